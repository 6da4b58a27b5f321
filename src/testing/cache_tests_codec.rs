//! Codec migration and re-serialization sweep tests.

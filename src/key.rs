//! Versioned cache keys.
//!
//! A [`CacheKey`] pairs the logical key the caller used with the wire key
//! sent to the backend: `"{prefix}:{version}:{key}"`. Key identity is the
//! wire key, so a key built by the single-backend facade and one built by the
//! sharded facade compare equal.

use std::fmt;

/// Prefix of the stampede lock key derived from a wire key.
pub const LOCK_PREFIX: &str = "_lock";

/// A logical key paired with its wire key.
#[derive(Debug, Clone)]
pub struct CacheKey {
    original: String,
    versioned: String,
}

impl CacheKey {
    /// The key the caller supplied.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// The key sent to the backend.
    pub fn wire(&self) -> &str {
        &self.versioned
    }

    /// Whether both keys address the same backend entry.
    pub fn same_key(&self, other: &CacheKey) -> bool {
        self.versioned == other.versioned
    }

    /// Whether this key's wire form equals a raw wire key.
    pub fn matches_wire(&self, wire: &str) -> bool {
        self.versioned == wire
    }

    /// The stampede lock key guarding this entry.
    pub fn lock_key(&self) -> String {
        format!("{}{}", LOCK_PREFIX, self.versioned)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.versioned)
    }
}

/// Anything that can be turned into a [`CacheKey`].
///
/// Strings are versioned; a `CacheKey` passes through unchanged, so
/// versioning an already versioned key never double-prefixes it.
pub trait IntoCacheKey {
    fn into_cache_key(self, codec: &KeyCodec, version: u64) -> CacheKey;
}

impl IntoCacheKey for &str {
    fn into_cache_key(self, codec: &KeyCodec, version: u64) -> CacheKey {
        CacheKey {
            original: self.to_string(),
            versioned: codec.wire_key(self, version),
        }
    }
}

impl IntoCacheKey for String {
    fn into_cache_key(self, codec: &KeyCodec, version: u64) -> CacheKey {
        let versioned = codec.wire_key(&self, version);
        CacheKey {
            original: self,
            versioned,
        }
    }
}

impl IntoCacheKey for &String {
    fn into_cache_key(self, codec: &KeyCodec, version: u64) -> CacheKey {
        self.as_str().into_cache_key(codec, version)
    }
}

impl IntoCacheKey for CacheKey {
    fn into_cache_key(self, _codec: &KeyCodec, _version: u64) -> CacheKey {
        self
    }
}

impl IntoCacheKey for &CacheKey {
    fn into_cache_key(self, _codec: &KeyCodec, _version: u64) -> CacheKey {
        self.clone()
    }
}

/// Builds wire keys from logical keys.
#[derive(Debug, Clone, Default)]
pub struct KeyCodec {
    prefix: String,
    default_version: u64,
}

impl KeyCodec {
    /// Create a key codec.
    pub fn new(prefix: impl Into<String>, default_version: u64) -> Self {
        Self {
            prefix: prefix.into(),
            default_version,
        }
    }

    /// The version used when a call passes `None`.
    pub fn default_version(&self) -> u64 {
        self.default_version
    }

    /// Resolve an optional version against the default.
    pub fn version_or_default(&self, version: Option<u64>) -> u64 {
        version.unwrap_or(self.default_version)
    }

    /// Build the versioned key for `key`.
    pub fn make_key<K: IntoCacheKey>(&self, key: K, version: Option<u64>) -> CacheKey {
        key.into_cache_key(self, self.version_or_default(version))
    }

    /// Build versioned keys element-wise, keeping input order.
    pub fn make_keys<I>(&self, keys: I, version: Option<u64>) -> Vec<CacheKey>
    where
        I: IntoIterator,
        I::Item: IntoCacheKey,
    {
        keys.into_iter()
            .map(|key| self.make_key(key, version))
            .collect()
    }

    fn wire_key(&self, key: &str, version: u64) -> String {
        format!("{}:{}:{}", self.prefix, version, key)
    }
}

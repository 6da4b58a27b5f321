//! Scenario tests for the sharded facade.
//!
//! These check where each operation lands, how many round trips multi-key
//! operations cost per shard, and that a single-shard deployment behaves
//! like the single-server facade.

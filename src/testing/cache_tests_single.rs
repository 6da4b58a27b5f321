//! Scenario tests for the single-server facade.

#[cfg(test)]
mod tests {
    use crate::cache::Cache;
    use crate::codec::{CodecVersion, Value, ValueCodec};
    use crate::error::{BackendError, Error};
    use crate::testing::TestShards;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_get_incr_scenario() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        assert!(cache.set("a", 1, Some(0)).await.unwrap());
        assert_eq!(cache.incr("a", 5).await.unwrap(), 6);
        assert_eq!(cache.get("a").await.unwrap(), Some(Value::Int(6)));

        // Integers are stored as decimal text so the native increment works.
        assert_eq!(shards.backend(0).raw(":1:a").unwrap(), Bytes::from_static(b"6"));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_an_error() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        assert_eq!(cache.get("nope").await.unwrap(), None);
        assert_eq!(
            cache.get_or_default("nope", Value::from("fallback")).await.unwrap(),
            Value::from("fallback")
        );
        assert!(!cache.has_key("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_negative_timeout_never_writes() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        assert!(!cache.set("k", "v", Some(-1)).await.unwrap());
        assert!(!cache.add("k", "v", Some(-1)).await.unwrap());
        cache
            .set_many(vec![("k", Value::from("v"))], Some(-1))
            .await
            .unwrap();

        assert!(shards.backend(0).is_empty());
        assert_eq!(cache.metrics().snapshot().set_skipped, 3);
    }

    #[tokio::test]
    async fn test_double_add() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        assert!(cache.add("k", "first", None).await.unwrap());
        assert!(!cache.add("k", "second", None).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(Value::from("first")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_control_expiry() {
        let shards = TestShards::new(1);
        let cache = shards
            .single_with(
                shards
                    .config()
                    .with_default_timeout(Duration::from_secs(60)),
            )
            .unwrap();

        cache.set("forever", 1, Some(0)).await.unwrap();
        cache.set("short", 1, Some(5)).await.unwrap();
        cache.set("default", 1, None).await.unwrap();
        cache.add("added", 1, Some(5)).await.unwrap();

        assert_eq!(cache.ttl("forever").await.unwrap(), None);
        assert_eq!(cache.ttl("short").await.unwrap(), Some(Duration::from_secs(5)));
        assert_eq!(cache.ttl("default").await.unwrap(), Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(cache.has_key("forever").await.unwrap());
        assert!(!cache.has_key("short").await.unwrap());
        assert!(!cache.has_key("added").await.unwrap());
        assert!(cache.has_key("default").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache.set("k", 1, Some(5)).await.unwrap();
        assert!(cache.touch("k", Some(100)).await.unwrap());
        assert_eq!(cache.ttl("k").await.unwrap(), Some(Duration::from_secs(100)));

        assert!(cache.touch("k", Some(0)).await.unwrap());
        assert_eq!(cache.ttl("k").await.unwrap(), None);

        assert!(!cache.touch("missing", Some(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache.set("k", 1, None).await.unwrap();
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_partial_get_many() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache.set("a", 1, None).await.unwrap();
        cache.set("c", "three", None).await.unwrap();

        let found = cache.get_many(["a", "b", "c"]).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["a"], Value::Int(1));
        assert_eq!(found["c"], Value::from("three"));
        assert!(!found.contains_key("b"));
    }

    #[tokio::test]
    async fn test_delete_many_empty_issues_no_call() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        let removed = cache.delete_many(Vec::<&str>::new()).await.unwrap();
        assert_eq!(removed, 0);
        assert!(shards.backend(0).calls().is_empty());
    }

    #[tokio::test]
    async fn test_incr_missing_key_fails() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        let err = cache.incr("missing", 1).await.unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(key) if key == "missing"));
        assert!(!cache.has_key("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_decr() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache.set("n", 10, Some(0)).await.unwrap();
        assert_eq!(cache.decr("n", 3).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_incr_fallback_on_serialized_bool() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache.set("flag", true, Some(0)).await.unwrap();
        assert_eq!(cache.incr("flag", 1).await.unwrap(), 2);
        assert_eq!(cache.get("flag").await.unwrap(), Some(Value::Int(2)));
        assert_eq!(cache.metrics().snapshot().incr_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_incr_fallback_rejects_text() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache.set("name", "alice", None).await.unwrap();
        let err = cache.incr("name", 1).await.unwrap_err();
        assert!(matches!(err, Error::NotNumeric(_)));
        assert_eq!(cache.get("name").await.unwrap(), Some(Value::from("alice")));
    }

    #[tokio::test]
    async fn test_incr_fallback_rejects_float() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache.set("ratio", 1.5, None).await.unwrap();
        let err = cache.incr("ratio", 1).await.unwrap_err();
        assert!(matches!(err, Error::NotNumeric(_)));
        assert_eq!(cache.get("ratio").await.unwrap(), Some(Value::Float(1.5)));
    }

    #[tokio::test]
    async fn test_incr_overflow() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache.set("big", i64::MAX, None).await.unwrap();
        let err = cache.incr("big", 1).await.unwrap_err();
        assert!(matches!(err, Error::Overflow(_)));
    }

    #[tokio::test]
    async fn test_incr_version_moves_key() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.incr_version("k", 1, None).await.unwrap(), 2);

        assert_eq!(cache.get("k").await.unwrap(), None);
        let moved = cache.make_key("k", Some(2));
        assert_eq!(cache.get(&moved).await.unwrap(), Some(Value::from("v")));

        assert_eq!(cache.decr_version("k", 1, Some(2)).await.unwrap(), 1);
        assert_eq!(cache.get("k").await.unwrap(), Some(Value::from("v")));
    }

    #[tokio::test]
    async fn test_incr_version_missing_key() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        let err = cache.incr_version("absent", 1, None).await.unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(_)));
        assert_eq!(cache.key_codec().default_version(), 1);
    }

    #[tokio::test]
    async fn test_incr_version_keeps_occupied_target() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache.set("k", "old", None).await.unwrap();
        let target = cache.make_key("k", Some(2));
        cache.set(&target, "newer", None).await.unwrap();

        let err = cache.incr_version("k", 1, None).await.unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(_)));

        assert_eq!(cache.get("k").await.unwrap(), Some(Value::from("old")));
        assert_eq!(cache.get(&target).await.unwrap(), Some(Value::from("newer")));
        assert_eq!(cache.key_codec().default_version(), 1);
    }

    #[tokio::test]
    async fn test_versions_are_separate_namespaces() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        let v2 = cache.make_key("k", Some(2));
        cache.set("k", 1, None).await.unwrap();
        cache.set(&v2, 2, None).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(Value::Int(1)));
        assert_eq!(cache.get(&v2).await.unwrap(), Some(Value::Int(2)));
        assert_eq!(shards.backend(0).raw_keys(), vec![":1:k", ":2:k"]);
    }

    #[tokio::test]
    async fn test_set_many_without_timeout_is_one_bulk_write() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache
            .set_many(
                vec![("a", Value::Int(1)), ("b", Value::from("two"))],
                None,
            )
            .await
            .unwrap();

        assert_eq!(shards.backend(0).calls(), vec!["multi_set"]);
        assert_eq!(cache.ttl("a").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_many_with_timeout_is_one_batch() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache
            .set_many(vec![("a", Value::Int(1)), ("b", Value::Int(2))], Some(30))
            .await
            .unwrap();

        assert_eq!(shards.backend(0).calls(), vec!["execute"]);
        assert_eq!(cache.ttl("b").await.unwrap(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_delete_pattern_scoped_to_version() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache.set("user:1", 1, None).await.unwrap();
        cache.set("user:2", 2, None).await.unwrap();
        cache.set("post:1", 3, None).await.unwrap();
        cache.set(&cache.make_key("user:3", Some(2)), 4, None).await.unwrap();

        assert_eq!(cache.delete_pattern("user:*", None).await.unwrap(), 2);
        assert_eq!(shards.backend(0).raw_keys(), vec![":1:post:1", ":2:user:3"]);
    }

    #[tokio::test]
    async fn test_clear_by_version_and_all() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache.set("a", 1, None).await.unwrap();
        cache.set(&cache.make_key("a", Some(5)), 1, None).await.unwrap();

        cache.clear(Some(1)).await.unwrap();
        assert_eq!(shards.backend(0).raw_keys(), vec![":5:a"]);

        cache.clear(None).await.unwrap();
        assert!(shards.backend(0).is_empty());
    }

    #[tokio::test]
    async fn test_structured_values_round_trip() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        let mut profile = BTreeMap::new();
        profile.insert("name".to_string(), Value::from("Alice"));
        profile.insert("tags".to_string(), Value::from(vec![Value::from("a"), Value::Null]));
        let value = Value::Map(profile);

        cache.set("profile", value.clone(), None).await.unwrap();
        assert_eq!(cache.get("profile").await.unwrap(), Some(value));

        let raw = shards.backend(0).raw(":1:profile").unwrap();
        assert_eq!(ValueCodec::payload_version(&raw), Some(CodecVersion::V2));
    }

    #[tokio::test]
    async fn test_key_prefix_applied() {
        let shards = TestShards::new(1);
        let cache = shards
            .single_with(shards.config().with_key_prefix("site").with_version(4))
            .unwrap();

        cache.set("k", 1, None).await.unwrap();
        assert_eq!(shards.holders("site:4:k"), vec![0]);
    }

    #[tokio::test]
    async fn test_backend_errors_propagate() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();
        shards.backend(0).set_unavailable(true);

        let err = cache.get("k").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Backend(BackendError::Unavailable { ref addr, .. }) if addr == "127.0.0.1:7000"
        ));
        assert!(err.is_backend());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_decode_error() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();
        shards
            .backend(0)
            .insert_raw(":1:junk", Bytes::from_static(b"not a number"));

        assert!(matches!(cache.get("junk").await, Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn test_metrics_track_operations() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();

        cache.set("a", 1, None).await.unwrap();
        cache.get("a").await.unwrap();
        cache.get("b").await.unwrap();
        cache.delete("a").await.unwrap();

        let snapshot = cache.metrics().snapshot();
        assert_eq!(snapshot.set_total, 1);
        assert_eq!(snapshot.get_hits, 1);
        assert_eq!(snapshot.get_misses, 1);
        assert_eq!(snapshot.delete_total, 1);
        assert_eq!(
            cache.metrics().shard_round_trips.get(["127.0.0.1:7000"]),
            shards.backend(0).round_trips()
        );
    }
}

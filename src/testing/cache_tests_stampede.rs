//! Tests for `get_or_set` and its stampede lock.

#[cfg(test)]
mod tests {
    use crate::backend::Backend;
    use crate::cache::Cache;
    use crate::codec::Value;
    use crate::config::StampedeMode;
    use crate::error::{Error, Result};
    use crate::testing::TestShards;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn load(calls: Arc<AtomicUsize>, value: Value) -> Result<Value> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    async fn load_slowly(calls: Arc<AtomicUsize>, value: Value) -> Result<Value> {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(value)
    }

    async fn load_after(calls: Arc<AtomicUsize>, delay: Duration, value: Value) -> Result<Value> {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        Ok(value)
    }

    async fn explode() -> Result<Value> {
        panic!("loader bug")
    }

    async fn fail(calls: Arc<AtomicUsize>) -> Result<Value> {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::Loader("upstream timed out".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_loader_runs_once_while_fresh() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_set("report", || load(calls.clone(), Value::from("v1")), Some(10))
            .await
            .unwrap();
        let second = cache
            .get_or_set("report", || load(calls.clone(), Value::from("v2")), Some(10))
            .await
            .unwrap();

        assert_eq!(first, Some(Value::from("v1")));
        assert_eq!(second, Some(Value::from("v1")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let snapshot = cache.metrics().snapshot();
        assert_eq!(snapshot.loader_invocations, 1);
        assert_eq!(snapshot.stampede_lock_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reloads_after_freshness_window() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_set("k", || load(calls.clone(), Value::Int(1)), Some(10))
            .await
            .unwrap();
        assert_eq!(
            shards.backend(0).time_to_live("_lock:1:k").await.unwrap(),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            shards.backend(0).raw("_lock:1:k").as_deref(),
            Some(&b"0"[..])
        );

        tokio::time::advance(Duration::from_secs(11)).await;

        let value = cache
            .get_or_set("k", || load(calls.clone(), Value::Int(2)), Some(10))
            .await
            .unwrap();
        assert_eq!(value, Some(Value::Int(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_written_with_default_timeout() {
        let shards = TestShards::new(1);
        let cache = shards
            .single_with(shards.config().with_default_timeout(Duration::from_secs(60)))
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_set("k", || load(calls.clone(), Value::Int(7)), Some(10))
            .await
            .unwrap();

        assert_eq!(cache.ttl("k").await.unwrap(), Some(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_held_and_value_gone_returns_none() {
        let shards = TestShards::new(1);
        let cache = shards
            .single_with(shards.config().with_default_timeout(Duration::from_secs(5)))
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_set("k", || load(calls.clone(), Value::Int(1)), Some(60))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        let value = cache
            .get_or_set("k", || load(calls.clone(), Value::Int(2)), Some(60))
            .await
            .unwrap();
        assert_eq!(value, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lock_has_no_expiry_while_loading() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();
        let backend = shards.backend(0);

        let observed = cache
            .get_or_set(
                "k",
                move || async move {
                    let present = backend.raw("_lock:1:k").is_some();
                    let ttl = backend.time_to_live("_lock:1:k").await.unwrap();
                    Ok::<_, Error>(Value::from(present && ttl.is_none()))
                },
                Some(30),
            )
            .await
            .unwrap();

        assert_eq!(observed, Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_loader_error_releases_lock() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let err = cache
            .get_or_set("k", || fail(calls.clone()), Some(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Loader(_)));
        assert!(shards.backend(0).raw("_lock:1:k").is_none());

        let value = cache
            .get_or_set("k", || load(calls.clone(), Value::Int(3)), Some(30))
            .await
            .unwrap();
        assert_eq!(value, Some(Value::Int(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_negative_timeout_leaves_no_lock() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_set("k", || load(calls.clone(), Value::Int(1)), Some(-1))
            .await
            .unwrap();
        assert!(shards.backend(0).raw("_lock:1:k").is_none());

        cache
            .get_or_set("k", || load(calls.clone(), Value::Int(1)), Some(-1))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_best_effort_reads_then_writes_lock() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_set("k", || load(calls.clone(), Value::Int(1)), Some(30))
            .await
            .unwrap();

        let backend_calls = shards.backend(0).calls();
        assert_eq!(&backend_calls[..2], &["get", "set"]);
    }

    #[tokio::test]
    async fn test_conditional_mode_claims_atomically() {
        let shards = TestShards::new(1);
        let cache = shards
            .single_with(shards.config().with_stampede_mode(StampedeMode::Conditional))
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache.get_or_set("k", || load_slowly(calls.clone(), Value::Int(1)), Some(30));
        let second = cache.get_or_set("k", || load(calls.clone(), Value::Int(2)), Some(30));
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap(), Some(Value::Int(1)));
        assert_eq!(second.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(shards.backend(0).calls()[0], "set_if_absent");
    }

    #[tokio::test]
    async fn test_sharded_lock_lives_on_write_connection() {
        let shards = TestShards::new(3);
        let cache = shards.sharded_with_master(2).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_set("k", || load(calls.clone(), Value::Int(1)), Some(30))
            .await
            .unwrap();

        assert_eq!(shards.holders("_lock:1:k"), vec![2]);
        assert_eq!(shards.holders(":1:k"), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_load_releases_lock() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = cache.get_or_set(
            "k",
            || load_after(calls.clone(), Duration::from_secs(10), Value::Int(1)),
            Some(30),
        );
        assert!(tokio::time::timeout(Duration::from_secs(1), slow).await.is_err());

        // Let the background release run.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(shards.backend(0).raw("_lock:1:k").is_none());

        let value = cache
            .get_or_set("k", || load(calls.clone(), Value::Int(2)), Some(30))
            .await
            .unwrap();
        assert_eq!(value, Some(Value::Int(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_loader_releases_lock() {
        let shards = TestShards::new(1);
        let cache = Arc::new(shards.single().unwrap());

        let task = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get_or_set("k", explode, Some(30)).await }
        });
        assert!(task.await.unwrap_err().is_panic());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(shards.backend(0).raw("_lock:1:k").is_none());
    }

    #[tokio::test]
    async fn test_completed_load_keeps_lock() {
        let shards = TestShards::new(1);
        let cache = shards.single().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_set("k", || load(calls.clone(), Value::Int(1)), Some(30))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        assert!(shards.backend(0).raw("_lock:1:k").is_some());
        assert_eq!(shards.backend(0).calls().last(), Some(&"set_with_expiry"));
    }
}

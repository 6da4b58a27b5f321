//! Basic example of using the sharded cache.
//!
//! Runs against in-memory servers, so no external process is needed:
//!   RUST_LOG=shardcache=debug cargo run --example basic

use shardcache::{Cache, CacheConfig, Error, MemoryConnector, ShardedCache, Value};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(env::var("RUST_LOG").unwrap_or_else(|_| "shardcache=info".to_string()))
        .init();

    let config = CacheConfig::from_servers(&["127.0.0.1:6379", "127.0.0.1:6380", "127.0.0.1:6381"])?
        .with_key_prefix("demo");

    let connector = Arc::new(MemoryConnector::new());
    let cache = ShardedCache::new(config, connector)?;

    println!("--- Basic Operations ---");
    cache.set("user:1", "Alice", Some(3600)).await?;
    cache.set("visits", 0, Some(0)).await?;
    cache.incr("visits", 3).await?;

    println!("user:1 = {:?}", cache.get("user:1").await?);
    println!("visits = {:?}", cache.get("visits").await?);
    println!(
        "user:1 lives on shard {}",
        cache.router().shard_for_key("user:1")
    );

    println!("\n--- Multi-key Operations ---");
    cache
        .set_many(
            vec![
                ("color:1", Value::from("red")),
                ("color:2", Value::from("green")),
                ("color:3", Value::from("blue")),
            ],
            None,
        )
        .await?;
    let colors = cache.get_many(["color:1", "color:2", "color:3", "color:4"]).await?;
    println!("Found {} of 4 colors", colors.len());

    println!("\n--- Stampede Avoidance ---");
    for round in 1..=3 {
        let value = cache
            .get_or_set(
                "report",
                || async move {
                    println!("  (loader running in round {})", round);
                    Ok::<_, Error>(Value::from("expensive result"))
                },
                Some(60),
            )
            .await?;
        println!("Round {}: {:?}", round, value);
    }

    println!("\n--- Versioning ---");
    let version = cache.incr_version("user:1", 1, None).await?;
    println!("user:1 moved to version {}", version);
    println!("user:1 at default version = {:?}", cache.get("user:1").await?);
    println!(
        "user:1 at version {} = {:?}",
        version,
        cache.get(cache.make_key("user:1", Some(version))).await?
    );

    println!("\n--- Maintenance ---");
    let rewritten = cache.reinsert_keys().await?;
    println!("Rewrote {} persistent keys", rewritten);

    cache.delete_pattern("color:*", None).await?;
    cache.clear(None).await?;

    let snapshot = cache.metrics().snapshot();
    println!("\nCache stats:");
    println!("  Gets: {}", snapshot.get_total);
    println!("  Hit rate: {:.2}%", snapshot.hit_rate() * 100.0);
    println!("  Loader invocations: {}", snapshot.loader_invocations);

    Ok(())
}

//! Backend-level implementation of every cache operation.
//!
//! Both facades resolve which connection an operation targets and then call
//! into [`CacheCore`], which encodes keys and values, issues the backend
//! calls and records metrics. Keeping the per-connection logic here is what
//! gives the single and sharded facades identical semantics.

use crate::backend::{Backend, Batch};
use crate::codec::{Value, ValueCodec};
use crate::config::{CacheConfig, StampedeMode};
use crate::connection::Connection;
use crate::error::{BackendError, Error, Result};
use crate::key::{CacheKey, KeyCodec};
use crate::metrics::CacheMetrics;
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Width of the progress bar drawn by the re-serialization sweep.
const PROGRESS_WIDTH: usize = 80;

/// Placeholder stored at a stampede lock key.
const LOCK_PLACEHOLDER: &[u8] = b"0";

/// What a timeout means for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiry {
    /// Negative timeout: do not write.
    Skip,
    /// Zero: no expiry.
    Never,
    /// Positive: expire after the duration.
    After(Duration),
}

/// Shared state and per-connection operations of a facade.
#[derive(Debug)]
pub(crate) struct CacheCore {
    pub(crate) keys: KeyCodec,
    pub(crate) codec: ValueCodec,
    pub(crate) metrics: CacheMetrics,
    default_timeout: i64,
    stampede_mode: StampedeMode,
}

impl CacheCore {
    pub(crate) fn new(config: &CacheConfig) -> Self {
        Self {
            keys: KeyCodec::new(config.key_prefix.clone(), config.version),
            codec: ValueCodec::new(config.options.codec_version),
            metrics: CacheMetrics::new(),
            default_timeout: config.default_timeout_secs(),
            stampede_mode: config.options.stampede_mode,
        }
    }

    /// Resolve a caller timeout, `None` meaning the default.
    pub(crate) fn expiry(&self, timeout: Option<i64>) -> Expiry {
        match timeout.unwrap_or(self.default_timeout) {
            t if t < 0 => Expiry::Skip,
            0 => Expiry::Never,
            t => Expiry::After(Duration::from_secs(t as u64)),
        }
    }

    /// The backend of `conn`, counting one round trip against it.
    fn backend<'a>(&self, conn: &'a Connection) -> &'a dyn Backend {
        self.metrics.record_round_trip(&conn.endpoint().to_string());
        conn.backend()
    }

    /// The backend of `conn` for one multi-key call carrying `keys` keys.
    fn batch_backend<'a>(&self, conn: &'a Connection, keys: usize) -> &'a dyn Backend {
        self.metrics.record_batch(&conn.endpoint().to_string(), keys);
        self.backend(conn)
    }

    async fn write_raw(
        &self,
        conn: &Connection,
        key: &str,
        raw: Bytes,
        timeout: Option<i64>,
    ) -> Result<bool> {
        match self.expiry(timeout) {
            Expiry::Skip => Ok(false),
            Expiry::Never => {
                self.backend(conn).set(key, raw).await?;
                Ok(true)
            }
            Expiry::After(ttl) => {
                self.backend(conn).set_with_expiry(key, raw, ttl).await?;
                Ok(true)
            }
        }
    }

    pub(crate) async fn add(
        &self,
        conn: &Connection,
        key: &CacheKey,
        value: &Value,
        timeout: Option<i64>,
    ) -> Result<bool> {
        let raw = self.codec.encode(value)?;
        let added = match self.expiry(timeout) {
            Expiry::Skip => false,
            Expiry::Never => self.backend(conn).set_if_absent(key.wire(), raw).await?,
            Expiry::After(ttl) => {
                self.backend(conn)
                    .set_if_absent_then_expire(key.wire(), raw, ttl)
                    .await?
            }
        };
        self.metrics.record_set(added);
        Ok(added)
    }

    pub(crate) async fn get(&self, conn: &Connection, key: &CacheKey) -> Result<Option<Value>> {
        let value = match self.backend(conn).get(key.wire()).await? {
            Some(raw) => Some(self.codec.decode(&raw)?),
            None => None,
        };
        self.metrics.record_get(value.is_some());
        Ok(value)
    }

    pub(crate) async fn set(
        &self,
        conn: &Connection,
        key: &CacheKey,
        value: &Value,
        timeout: Option<i64>,
    ) -> Result<bool> {
        let raw = self.codec.encode(value)?;
        let written = self.write_raw(conn, key.wire(), raw, timeout).await?;
        self.metrics.record_set(written);
        Ok(written)
    }

    pub(crate) async fn delete(&self, conn: &Connection, key: &CacheKey) -> Result<bool> {
        self.metrics.delete_total.inc();
        let removed = self
            .backend(conn)
            .delete(&[key.wire().to_string()])
            .await?;
        Ok(removed > 0)
    }

    pub(crate) async fn delete_many(&self, conn: &Connection, keys: &[CacheKey]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.metrics.delete_total.inc_by(keys.len() as u64);
        let wire: Vec<String> = keys.iter().map(|k| k.wire().to_string()).collect();
        Ok(self.batch_backend(conn, wire.len()).delete(&wire).await?)
    }

    pub(crate) async fn flush(&self, conn: &Connection) -> Result<()> {
        info!(endpoint = %conn.endpoint(), "Flushing cache database");
        self.backend(conn).flush_all().await?;
        Ok(())
    }

    /// Read `keys` from one connection into `out`, keyed by logical key.
    pub(crate) async fn get_many(
        &self,
        conn: &Connection,
        keys: &[CacheKey],
        out: &mut HashMap<String, Value>,
    ) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let wire: Vec<String> = keys.iter().map(|k| k.wire().to_string()).collect();
        let results = self.batch_backend(conn, wire.len()).multi_get(&wire).await?;
        for (key, raw) in keys.iter().zip(results) {
            if let Some(raw) = raw {
                out.insert(key.original().to_string(), self.codec.decode(&raw)?);
            }
        }
        Ok(())
    }

    /// Write entries to one connection with a single bulk write, no expiry.
    pub(crate) async fn set_many(
        &self,
        conn: &Connection,
        entries: &[(CacheKey, Value)],
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let encoded = entries
            .iter()
            .map(|(key, value)| Ok((key.wire().to_string(), self.codec.encode(value)?)))
            .collect::<Result<Vec<_>>>()?;
        self.metrics.set_total.inc_by(entries.len() as u64);
        self.batch_backend(conn, encoded.len()).multi_set(encoded).await?;
        Ok(())
    }

    /// Write entries to one connection as a single batch of timed writes.
    pub(crate) async fn set_many_timed(
        &self,
        conn: &Connection,
        entries: &[(CacheKey, Value)],
        timeout: i64,
    ) -> Result<()> {
        let expiry = self.expiry(Some(timeout));
        if expiry == Expiry::Skip {
            self.metrics.set_skipped.inc_by(entries.len() as u64);
            return Ok(());
        }
        if entries.is_empty() {
            return Ok(());
        }

        let mut batch = Batch::new();
        for (key, value) in entries {
            let raw = self.codec.encode(value)?;
            match expiry {
                Expiry::After(ttl) => batch.set_with_expiry(key.wire(), raw, ttl),
                _ => batch.set(key.wire(), raw),
            };
        }
        self.metrics.set_total.inc_by(entries.len() as u64);
        debug!(endpoint = %conn.endpoint(), commands = batch.len(), "Executing write batch");
        self.batch_backend(conn, entries.len()).execute(batch).await?;
        Ok(())
    }

    /// Add `delta` to an existing integer.
    ///
    /// Uses the backend's atomic increment. If the backend rejects the
    /// stored value (a serialized payload such as a boolean, or an integer
    /// that would overflow), falls back to read, add, write. The fallback is
    /// not atomic: concurrent fallback writers can lose updates.
    pub(crate) async fn incr(&self, conn: &Connection, key: &CacheKey, delta: i64) -> Result<i64> {
        if !self.backend(conn).exists(key.wire()).await? {
            return Err(Error::KeyNotFound(key.original().to_string()));
        }

        match self.backend(conn).increment(key.wire(), delta).await {
            Ok(value) => Ok(value),
            Err(BackendError::NotAnInteger) => {
                warn!(key = %key.original(), "Atomic increment rejected, using read-modify-write");
                self.metrics.incr_fallbacks.inc();

                let current = self
                    .get(conn, key)
                    .await?
                    .ok_or_else(|| Error::KeyNotFound(key.original().to_string()))?;
                let current = current
                    .as_i64()
                    .ok_or_else(|| Error::NotNumeric(key.original().to_string()))?;
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| Error::Overflow(key.original().to_string()))?;
                self.set(conn, key, &Value::Int(next), None).await?;
                Ok(next)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move `key` from `version` to `version + delta`. Returns the new version.
    ///
    /// Fails with [`Error::KeyNotFound`] if the source is absent or the
    /// target version is already occupied. Neither key is modified then.
    pub(crate) async fn incr_version(
        &self,
        conn: &Connection,
        key: &str,
        delta: i64,
        version: Option<u64>,
    ) -> Result<u64> {
        let version = self.keys.version_or_default(version);
        let next = version
            .checked_add_signed(delta)
            .ok_or_else(|| Error::Overflow(key.to_string()))?;
        let old = self.keys.make_key(key, Some(version));
        let new = self.keys.make_key(key, Some(next));

        match self.backend(conn).rename_if_absent(old.wire(), new.wire()).await {
            Ok(true) => {
                debug!(key, from = version, to = next, "Moved key to new namespace version");
                Ok(next)
            }
            Ok(false) => {
                warn!(key, from = version, to = next, "Target version already holds a value");
                Err(Error::KeyNotFound(key.to_string()))
            }
            Err(BackendError::NoSuchKey) => Err(Error::KeyNotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn has_key(&self, conn: &Connection, key: &CacheKey) -> Result<bool> {
        Ok(self.backend(conn).exists(key.wire()).await?)
    }

    pub(crate) async fn touch(
        &self,
        conn: &Connection,
        key: &CacheKey,
        timeout: Option<i64>,
    ) -> Result<bool> {
        match self.expiry(timeout) {
            Expiry::Skip => Ok(self.backend(conn).delete(&[key.wire().to_string()]).await? > 0),
            Expiry::Never => Ok(self.backend(conn).persist(key.wire()).await?),
            Expiry::After(ttl) => Ok(self.backend(conn).expire(key.wire(), ttl).await?),
        }
    }

    pub(crate) async fn ttl(&self, conn: &Connection, key: &CacheKey) -> Result<Option<Duration>> {
        Ok(self.backend(conn).time_to_live(key.wire()).await?)
    }

    /// Delete every key on `conn` matching an already versioned pattern.
    pub(crate) async fn delete_pattern(&self, conn: &Connection, pattern: &CacheKey) -> Result<u64> {
        let keys = self.backend(conn).keys_matching(pattern.wire()).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        debug!(endpoint = %conn.endpoint(), pattern = %pattern, count = keys.len(), "Deleting keys by pattern");
        self.metrics.delete_total.inc_by(keys.len() as u64);
        Ok(self.backend(conn).delete(&keys).await?)
    }

    /// Return the value at `key`, running `loader` if no load is in flight
    /// and the last load is no longer fresh.
    ///
    /// The lock key stays without expiry while the loader runs, then is
    /// rewritten with the freshness timeout. In best-effort mode the lock is
    /// read, then written: two callers interleaving between those two calls
    /// can both load. Conditional mode claims the lock with set-if-absent.
    /// A call dropped or panicking before it completes releases its lock in
    /// the background.
    pub(crate) async fn get_or_set<F, Fut>(
        &self,
        conn: &Connection,
        key: &CacheKey,
        loader: F,
        timeout: Option<i64>,
    ) -> Result<Option<Value>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value>> + Send,
    {
        let lock = key.lock_key();
        let placeholder = Bytes::from_static(LOCK_PLACEHOLDER);

        let claimed = match self.stampede_mode {
            StampedeMode::BestEffort => {
                let held = self.backend(conn).get(&lock).await?.is_some();
                if !held {
                    self.backend(conn).set(&lock, placeholder.clone()).await?;
                }
                !held
            }
            StampedeMode::Conditional => {
                self.backend(conn)
                    .set_if_absent(&lock, placeholder.clone())
                    .await?
            }
        };

        if !claimed {
            debug!(key = %key.original(), "Stampede lock held, serving current value");
            self.metrics.stampede_lock_hits.inc();
            return self.get(conn, key).await;
        }

        debug!(key = %key.original(), "Stampede lock claimed, running loader");
        self.metrics.loader_invocations.inc();
        let mut release = LockRelease::new(conn, &lock);
        let value = match loader().await {
            Ok(value) => value,
            Err(e) => {
                self.backend(conn).delete(&[lock]).await?;
                release.disarm();
                return Err(e);
            }
        };

        self.set(conn, key, &value, None).await?;
        if !self.write_raw(conn, &lock, placeholder, timeout).await? {
            // A negative freshness timeout leaves no window at all.
            self.backend(conn).delete(&[lock]).await?;
        }
        release.disarm();
        Ok(Some(value))
    }

    /// Rewrite every non-expiring value on `conn` with the current codec.
    ///
    /// Returns how many keys were rewritten.
    pub(crate) async fn reinsert_keys(
        &self,
        conn: &Connection,
        progress: &mut ProgressBar<'_>,
    ) -> Result<usize> {
        let keys = self.backend(conn).keys_matching("*").await?;
        let total = keys.len();
        let mut rewritten = 0;

        for (i, key) in keys.iter().enumerate() {
            if self.backend(conn).time_to_live(key).await?.is_none() {
                if let Some(raw) = self.backend(conn).get(key).await? {
                    let value = self.codec.decode(&raw)?;
                    self.backend(conn).set(key, self.codec.encode(&value)?).await?;
                    rewritten += 1;
                }
            }
            progress.draw(i as f64 / total as f64)?;
        }

        info!(endpoint = %conn.endpoint(), total, rewritten, "Reinserted keys");
        Ok(rewritten)
    }
}

/// Deletes a claimed stampede lock when dropped while still armed.
///
/// Covers a `get_or_set` future dropped mid-load (timeout, `select!`, a
/// panicking loader), whose lock has no expiry yet. The delete runs as a
/// task on the current runtime.
struct LockRelease {
    armed: Option<(Connection, String)>,
}

impl LockRelease {
    fn new(conn: &Connection, lock: &str) -> Self {
        Self {
            armed: Some((conn.clone(), lock.to_string())),
        }
    }

    fn disarm(&mut self) {
        self.armed = None;
    }
}

impl Drop for LockRelease {
    fn drop(&mut self) {
        let Some((conn, lock)) = self.armed.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                debug!(endpoint = %conn.endpoint(), lock = %lock, "Releasing abandoned stampede lock");
                handle.spawn(async move {
                    let keys = [lock];
                    if let Err(e) = conn.backend().delete(&keys).await {
                        warn!(endpoint = %conn.endpoint(), lock = %keys[0], error = %e, "Failed to release stampede lock");
                    }
                });
            }
            Err(_) => {
                warn!(endpoint = %conn.endpoint(), lock = %lock, "No runtime to release stampede lock");
            }
        }
    }
}

/// Text progress bar for the re-serialization sweep.
pub(crate) struct ProgressBar<'a> {
    out: &'a mut (dyn Write + Send),
}

impl<'a> ProgressBar<'a> {
    pub(crate) fn new(out: &'a mut (dyn Write + Send)) -> Self {
        Self { out }
    }

    /// Redraw the bar at `fraction` (0.0 to 1.0).
    pub(crate) fn draw(&mut self, fraction: f64) -> Result<()> {
        let fraction = fraction.clamp(0.0, 1.0);
        let filled = (fraction * PROGRESS_WIDTH as f64).ceil() as usize;
        write!(
            self.out,
            "Reinserting keys: |{}{}| {:>3}%\r",
            "=".repeat(filled),
            " ".repeat(PROGRESS_WIDTH - filled),
            (fraction * 100.0).round() as u32
        )?;
        self.out.flush()?;
        Ok(())
    }

    /// Draw the full bar and end the line.
    pub(crate) fn finish(&mut self) -> Result<()> {
        self.draw(1.0)?;
        writeln!(self.out)?;
        Ok(())
    }
}

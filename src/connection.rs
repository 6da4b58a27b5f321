//! Backend connection set.
//!
//! Every facade owns a [`ConnectionRegistry`]. The registry builds one
//! backend per distinct [`ConnectionParams`] through a [`Connector`] and
//! keeps it for the facade's lifetime; dropping the facade drops the pools.

use crate::backend::{Backend, MemoryBackend};
use crate::config::{CacheConfig, Endpoint, ParserKind};
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The identity of a connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionParams {
    pub endpoint: Endpoint,
    pub db: u32,
    pub password: Option<String>,
    pub parser: ParserKind,
    pub max_connections: Option<usize>,
}

impl ConnectionParams {
    /// Params for `endpoint` with the shared settings of `config`.
    pub fn from_config(endpoint: Endpoint, config: &CacheConfig) -> Self {
        Self {
            endpoint,
            db: config.db,
            password: config.password.clone(),
            parser: config.options.parser,
            max_connections: config.options.max_connections,
        }
    }
}

/// Builds backends. Transport adapters implement this.
pub trait Connector: Send + Sync {
    fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Backend>>;
}

/// One backend in the shard table.
#[derive(Debug, Clone)]
pub struct Connection {
    params: ConnectionParams,
    backend: Arc<dyn Backend>,
}

impl Connection {
    /// Wrap a backend.
    pub fn new(params: ConnectionParams, backend: Arc<dyn Backend>) -> Self {
        Self { params, backend }
    }

    /// Connection parameters.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// The endpoint this connection talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.params.endpoint
    }

    /// The backend client.
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
}

/// Connection pools owned by one facade, keyed by their params.
pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,
    pools: Mutex<HashMap<ConnectionParams, Arc<dyn Backend>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// The pool for `params`, built on first use.
    pub fn get_or_connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Backend>> {
        let mut pools = self.pools.lock();
        if let Some(backend) = pools.get(params) {
            return Ok(backend.clone());
        }
        debug!(endpoint = %params.endpoint, db = params.db, "Opening connection pool");
        let backend = self.connector.connect(params)?;
        pools.insert(params.clone(), backend.clone());
        Ok(backend)
    }

    /// Build the connection set for every server in `config`, in order.
    pub fn connect_all(&self, config: &CacheConfig) -> Result<Vec<Connection>> {
        config
            .servers
            .iter()
            .map(|endpoint| {
                let params = ConnectionParams::from_config(endpoint.clone(), config);
                let backend = self.get_or_connect(&params)?;
                Ok(Connection::new(params, backend))
            })
            .collect()
    }

    /// Number of open pools.
    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    /// Whether no pool is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("pools", &self.len())
            .finish()
    }
}

/// Connector producing [`MemoryBackend`]s.
///
/// Backends are shared per endpoint, so facades built from the same
/// connector see the same data, like clients of the same servers would.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    backends: Mutex<HashMap<Endpoint, Arc<MemoryBackend>>>,
}

impl MemoryConnector {
    /// Create a connector with no servers yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The backend standing in for `endpoint`, created on first use.
    pub fn backend(&self, endpoint: &Endpoint) -> Arc<MemoryBackend> {
        self.backends
            .lock()
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(MemoryBackend::new(endpoint.clone())))
            .clone()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Backend>> {
        Ok(self.backend(&params.endpoint))
    }
}

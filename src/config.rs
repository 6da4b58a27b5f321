//! Configuration types for the cache facades.

use crate::codec::CodecVersion;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default database index on every backend.
pub const DEFAULT_DB: u32 = 1;

/// Default timeout applied when an operation passes `None`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default seed for the shard routing hash.
pub const DEFAULT_HASH_SEED: u64 = 0x5AFE_CAFE_DEAD_BEEF;

/// Main configuration for a cache facade.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Backend endpoints, in shard order.
    pub servers: Vec<Endpoint>,

    /// Database index selected on every connection.
    pub db: u32,

    /// Optional password sent on connect.
    pub password: Option<String>,

    /// Optional write-master. Must match one of `servers`.
    pub master: Option<MasterAddress>,

    /// Prefix mixed into every wire key.
    pub key_prefix: String,

    /// Default namespace version.
    pub version: u64,

    /// Timeout used when an operation passes `None`.
    pub default_timeout: Duration,

    /// Seed for the routing hash. Must be identical on every client sharing a shard list.
    pub hash_seed: u64,

    /// Recognized options passed through to the codec and connection layer.
    pub options: CacheOptions,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            db: DEFAULT_DB,
            password: None,
            master: None,
            key_prefix: String::new(),
            version: 1,
            default_timeout: DEFAULT_TIMEOUT,
            hash_seed: DEFAULT_HASH_SEED,
            options: CacheOptions::default(),
        }
    }
}

impl CacheConfig {
    /// Create a configuration for the given endpoints.
    pub fn new(servers: Vec<Endpoint>) -> Self {
        Self {
            servers,
            ..Default::default()
        }
    }

    /// Parse endpoint strings (`host:port` or a socket path).
    pub fn from_servers<S: AsRef<str>>(servers: &[S]) -> Result<Self> {
        let servers = servers
            .iter()
            .map(|s| Endpoint::parse(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(servers))
    }

    /// Build a configuration from endpoint strings and a string options map.
    ///
    /// Recognized keys: `DB`, `PASSWORD`, `MASTER_CACHE`, `SERIALIZER_VERSION`,
    /// `MAX_CONNECTIONS`, `PARSER`, `KEY_PREFIX`, `VERSION`, `TIMEOUT`,
    /// `STAMPEDE_MODE`. Unknown keys are ignored.
    pub fn from_options<S: AsRef<str>>(
        servers: &[S],
        options: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut config = Self::from_servers(servers)?;

        if let Some(db) = options.get("DB") {
            config.db = db
                .trim()
                .parse()
                .map_err(|_| Error::Config("db value must be an integer".into()))?;
        }
        if let Some(password) = options.get("PASSWORD") {
            config.password = Some(password.clone());
        }
        if let Some(master) = options.get("MASTER_CACHE") {
            config.master = Some(master.parse()?);
        }
        if let Some(prefix) = options.get("KEY_PREFIX") {
            config.key_prefix = prefix.clone();
        }
        if let Some(version) = options.get("VERSION") {
            config.version = version
                .trim()
                .parse()
                .map_err(|_| Error::Config("version value must be a non-negative integer".into()))?;
        }
        if let Some(timeout) = options.get("TIMEOUT") {
            let secs: u64 = timeout
                .trim()
                .parse()
                .map_err(|_| Error::Config("timeout value must be a non-negative integer".into()))?;
            config.default_timeout = Duration::from_secs(secs);
        }
        if let Some(version) = options.get("SERIALIZER_VERSION") {
            let raw: i64 = version
                .trim()
                .parse()
                .map_err(|_| Error::Config("serializer version value must be an integer".into()))?;
            config.options.codec_version = CodecVersion::from_option(raw)?;
        }
        if let Some(max) = options.get("MAX_CONNECTIONS") {
            let max: usize = max
                .trim()
                .parse()
                .map_err(|_| Error::Config("max connections value must be an integer".into()))?;
            config.options.max_connections = Some(max);
        }
        if let Some(parser) = options.get("PARSER") {
            config.options.parser = parser.parse()?;
        }
        if let Some(mode) = options.get("STAMPEDE_MODE") {
            config.options.stampede_mode = mode.parse()?;
        }

        Ok(config)
    }

    /// Set the database index.
    pub fn with_db(mut self, db: u32) -> Self {
        self.db = db;
        self
    }

    /// Set the connection password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Designate a write-master.
    pub fn with_master(mut self, master: MasterAddress) -> Self {
        self.master = Some(master);
        self
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the default namespace version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Set the default timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the routing hash seed.
    pub fn with_hash_seed(mut self, seed: u64) -> Self {
        self.hash_seed = seed;
        self
    }

    /// Set the options bag.
    pub fn with_options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the codec version.
    pub fn with_codec_version(mut self, version: CodecVersion) -> Self {
        self.options.codec_version = version;
        self
    }

    /// Set the stampede lock mode.
    pub fn with_stampede_mode(mut self, mode: StampedeMode) -> Self {
        self.options.stampede_mode = mode;
        self
    }

    /// Default timeout in whole seconds.
    pub(crate) fn default_timeout_secs(&self) -> i64 {
        i64::try_from(self.default_timeout.as_secs()).unwrap_or(i64::MAX)
    }
}

/// Options passed through to the codec and connection layer.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Wire format for non-integer values.
    pub codec_version: CodecVersion,

    /// Connection pool size. `None` leaves the connector's default.
    pub max_connections: Option<usize>,

    /// Reply parser implementation used by the connector.
    pub parser: ParserKind,

    /// How `get_or_set` claims its lock.
    pub stampede_mode: StampedeMode,
}

/// Address of one backend server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP endpoint.
    Tcp { host: String, port: u16 },
    /// Local socket path.
    Unix(PathBuf),
}

impl Endpoint {
    /// Create a TCP endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port` (split at the last `:`) or, without a colon, a socket path.
    pub fn parse(s: &str) -> Result<Self> {
        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| Error::Config("port value must be an integer".into()))?;
                Ok(Endpoint::tcp(host, port))
            }
            None => Ok(Endpoint::Unix(PathBuf::from(s))),
        }
    }

    /// Whether this endpoint is the given master address.
    pub fn matches(&self, master: &MasterAddress) -> bool {
        match self {
            Endpoint::Tcp { host, port } => *host == master.host && *port == master.port,
            Endpoint::Unix(_) => false,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

/// `host:port` of the write-master.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MasterAddress {
    pub host: String,
    pub port: u16,
}

impl MasterAddress {
    /// Create a master address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for MasterAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || Error::Config("MASTER_CACHE must be in the form <host>:<port>".into());
        let mut parts = s.split(':');
        let (host, port) = match (parts.next(), parts.next(), parts.next()) {
            (Some(host), Some(port), None) if !host.is_empty() => (host, port),
            _ => return Err(malformed()),
        };
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::Config("port value must be an integer".into()))?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for MasterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Reply parser implementation handed to the connector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ParserKind {
    /// The connector's built-in parser.
    #[default]
    Default,
    /// The native hiredis parser.
    Hiredis,
}

impl FromStr for ParserKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "default" => Ok(ParserKind::Default),
            "hiredis" => Ok(ParserKind::Hiredis),
            other => Err(Error::Config(format!("unknown parser '{}'", other))),
        }
    }
}

/// How `get_or_set` claims its stampede lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StampedeMode {
    /// Read the lock, then write it. Two callers racing between the read and
    /// the write may both run the loader.
    #[default]
    BestEffort,
    /// Claim the lock with an atomic set-if-absent.
    Conditional,
}

impl FromStr for StampedeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best_effort" | "best-effort" => Ok(StampedeMode::BestEffort),
            "conditional" => Ok(StampedeMode::Conditional),
            other => Err(Error::Config(format!("unknown stampede mode '{}'", other))),
        }
    }
}

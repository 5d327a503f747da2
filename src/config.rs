use crate::storage::IndexPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address
    pub bind_addr: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum simultaneous client connections
    pub max_connections: usize,

    /// Bytes read from a socket per read call
    pub connection_buffer_size: usize,

    /// TCP nodelay
    pub tcp_nodelay: bool,

    /// Background threads that free large values
    pub worker_threads: usize,

    /// Sorted sets with more members than this are freed off the event loop
    pub large_value_threshold: usize,

    /// Slot count of a fresh hash index (power of two)
    pub index_initial_capacity: usize,

    /// Average chain length that triggers a resize
    pub index_load_factor: usize,

    /// Migration work done per insert while resizing
    pub index_migrate_batch: usize,

    /// Most expired keys reclaimed per event-loop iteration
    pub expire_batch: usize,

    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let policy = IndexPolicy::default();
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 1234,
            max_connections: 10000,
            connection_buffer_size: 64 * 1024, // 64KB
            tcp_nodelay: true,
            worker_threads: num_cpus::get().clamp(1, 4),
            large_value_threshold: 1000,
            index_initial_capacity: policy.initial_capacity,
            index_load_factor: policy.load_factor,
            index_migrate_batch: policy.migrate_batch,
            expire_batch: 2000,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Fields missing from the file keep their defaults.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use pollkv::Config;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config = Config::from_file("pollkv.toml")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be > 0");
        }

        if self.connection_buffer_size < 1024 {
            anyhow::bail!("connection_buffer_size must be >= 1024");
        }

        if self.max_connections == 0 {
            anyhow::bail!("max_connections must be > 0");
        }

        if self.worker_threads == 0 {
            anyhow::bail!("worker_threads must be > 0");
        }

        if !self.index_initial_capacity.is_power_of_two() {
            anyhow::bail!("index_initial_capacity must be a power of two");
        }

        if self.index_load_factor == 0 || self.index_migrate_batch == 0 {
            anyhow::bail!("index_load_factor and index_migrate_batch must be > 0");
        }

        if self.expire_batch == 0 {
            anyhow::bail!("expire_batch must be > 0");
        }

        Ok(())
    }

    /// Hash index tuning for every index the server creates
    pub fn index_policy(&self) -> IndexPolicy {
        IndexPolicy {
            initial_capacity: self.index_initial_capacity,
            load_factor: self.index_load_factor,
            migrate_batch: self.index_migrate_batch,
        }
    }

    /// Socket address string the listener binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

//! Controller configuration (env-driven).

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use vigil_cluster::{AddressScope, KeyLayout};
use vigil_id::ServiceId;
use vigil_reconcile::{
    ReadErrorPolicy, DEFAULT_LOAD_WAIT, DEFAULT_NO_HOST_DELAY, DEFAULT_RECONCILE_INTERVAL,
    DEFAULT_SETTLE_DELAY,
};

use crate::catalog::{
    ServiceCatalog, DEFAULT_EXPORTER_ID, DEFAULT_EXPORTER_IMAGE, DEFAULT_SERVER_ID,
    DEFAULT_SERVER_IMAGE,
};

/// Role of this process in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    /// Runs the leadership binding and serves the query proxy.
    Leader,

    /// Serves health endpoints only.
    Follower,
}

impl FromStr for NodeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "leader" => Ok(Self::Leader),
            "follower" => Ok(Self::Follower),
            other => bail!("unknown node mode '{other}' (expected leader or follower)"),
        }
    }
}

impl NodeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::Follower => "follower",
        }
    }
}

/// Which collaborator implementations to wire up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// reqwest clients against the cluster API.
    Remote,

    /// In-process collaborators for local development.
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "remote" => Ok(Self::Remote),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown backend '{other}' (expected remote or memory)"),
        }
    }
}

/// Timings and policies of the placement reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Delay from the end of one tick to the start of the next.
    pub interval: Duration,

    /// Delay before the next tick when no eligible host exists.
    pub no_host_delay: Duration,

    /// Grace period before re-listing instances that have not loaded.
    pub load_wait: Duration,

    /// Pause after a promotion when the store lists no services.
    pub settle_delay: Duration,

    /// How existence checks treat failed store reads.
    pub read_error_policy: ReadErrorPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONCILE_INTERVAL,
            no_host_delay: DEFAULT_NO_HOST_DELAY,
            load_wait: DEFAULT_LOAD_WAIT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            read_error_policy: ReadErrorPolicy::default(),
        }
    }
}

/// Settings of the streaming query proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Which host address of the backend instance to dial.
    pub address_scope: AddressScope,

    /// Connect timeout for backend connections.
    pub connect_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            address_scope: AddressScope::Private,
            connect_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub mode: NodeMode,
    pub backend: BackendKind,

    /// Cluster API base URL (example: http://localhost:8080).
    pub cluster_api_url: String,

    /// Leadership poll interval of the remote membership client.
    pub membership_poll_interval: Duration,

    pub keys: KeyLayout,
    pub catalog: ServiceCatalog,
    pub reconciler: ReconcilerConfig,
    pub proxy: ProxyConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("VIGIL_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8081".to_string())
            .parse()
            .context("VIGIL_LISTEN_ADDR must be a socket address.")?;

        let log_level = std::env::var("VIGIL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let mode = env_parse("VIGIL_MODE")?.unwrap_or(NodeMode::Leader);
        let backend = env_parse("VIGIL_BACKEND")?.unwrap_or(BackendKind::Remote);

        let cluster_api_url = std::env::var("VIGIL_CLUSTER_API_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());

        let poll_ms: u64 = env_parse("VIGIL_MEMBERSHIP_POLL_MS")?.unwrap_or(1000);
        let membership_poll_interval = Duration::from_millis(poll_ms.max(50));

        let defaults = ReconcilerConfig::default();
        let reconciler = ReconcilerConfig {
            interval: env_secs("VIGIL_RECONCILE_INTERVAL_SECS")?.unwrap_or(defaults.interval),
            no_host_delay: env_secs("VIGIL_NO_HOST_DELAY_SECS")?
                .unwrap_or(defaults.no_host_delay),
            load_wait: env_secs("VIGIL_LOAD_WAIT_SECS")?.unwrap_or(defaults.load_wait),
            settle_delay: env_parse::<u64>("VIGIL_SETTLE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.settle_delay),
            read_error_policy: match std::env::var("VIGIL_STORE_READ_ERROR_POLICY") {
                Ok(raw) => raw
                    .parse()
                    .context("VIGIL_STORE_READ_ERROR_POLICY must be assume_absent or assume_present.")?,
                Err(_) => defaults.read_error_policy,
            },
        };

        let proxy = ProxyConfig {
            address_scope: match std::env::var("VIGIL_ADDRESS_SCOPE") {
                Ok(raw) => raw
                    .parse()
                    .context("VIGIL_ADDRESS_SCOPE must be private or public.")?,
                Err(_) => AddressScope::Private,
            },
            connect_timeout: Duration::from_millis(
                env_parse("VIGIL_BACKEND_CONNECT_TIMEOUT_MS")?.unwrap_or(2000),
            ),
        };

        let catalog = ServiceCatalog {
            server_id: env_service_id("VIGIL_SERVER_SERVICE_ID", DEFAULT_SERVER_ID)?,
            server_image: std::env::var("VIGIL_SERVER_IMAGE")
                .unwrap_or_else(|_| DEFAULT_SERVER_IMAGE.to_string()),
            exporter_id: env_service_id("VIGIL_EXPORTER_SERVICE_ID", DEFAULT_EXPORTER_ID)?,
            exporter_image: std::env::var("VIGIL_EXPORTER_IMAGE")
                .unwrap_or_else(|_| DEFAULT_EXPORTER_IMAGE.to_string()),
        };

        Ok(Self {
            listen_addr,
            log_level,
            mode,
            backend,
            cluster_api_url,
            membership_poll_interval,
            keys: KeyLayout::default(),
            catalog,
            reconciler,
            proxy,
        })
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{name} is invalid: {e}")),
        Err(_) => Ok(None),
    }
}

fn env_secs(name: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_secs))
}

fn env_service_id(name: &str, default: &str) -> Result<ServiceId> {
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    ServiceId::parse(&raw).with_context(|| format!("{name} is not a valid service id."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_mode_parse() {
        assert_eq!("leader".parse::<NodeMode>().unwrap(), NodeMode::Leader);
        assert_eq!("follower".parse::<NodeMode>().unwrap(), NodeMode::Follower);
        assert!("standby".parse::<NodeMode>().is_err());
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert!("etcd".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_reconciler_defaults() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.no_host_delay, Duration::from_secs(60));
        assert_eq!(config.load_wait, Duration::from_secs(30));
        assert_eq!(config.settle_delay, Duration::from_secs(2));
        assert_eq!(config.read_error_policy, ReadErrorPolicy::AssumeAbsent);
    }
}

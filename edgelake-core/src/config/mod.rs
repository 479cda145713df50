use std::{
    collections::HashSet,
    net::SocketAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

mod extractor;
pub use extractor::InvokePath;

// Default iouring/epoll entries: 32k
const DEFAULT_ENTRIES: u32 = 32768;
// Routing data should go stale quickly, independent of business caches.
const DEFAULT_ROUTING_TTL_SECS: u64 = 120;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const REGION_ENV: &str = "REGION_NAME";
pub const DEFAULT_INVOKE_PATH: &str = "/invoke";
pub const FALLBACK_PARALLELISM: NonZeroUsize = NonZeroUsize::MIN;

macro_rules! define_const {
    ($name: ident, $val: expr, $type: ty) => {
        const fn $name() -> $type {
            $val
        }
    };
}

/// Process configuration. Read once at start and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// Operating region. Endpoints configured for another region are rejected.
    pub region: String,
    /// Areas whose functions receive the complete ingress event.
    pub full_event_areas: HashSet<String>,
    /// Endpoint used for websocket messages whose connection record carries none.
    pub stream_endpoint_id: Option<String>,
    pub notification_channel: Option<String>,
    pub listener: ListenerConfig,
    pub invoke_path: String,
    pub runtime: RuntimeConfig,
    pub cache: CacheConfig,
    pub authorizer: AuthorizerConfig,
    pub trigger: Option<TriggerConfig>,
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            region: DEFAULT_REGION.to_string(),
            full_event_areas: HashSet::new(),
            stream_endpoint_id: None,
            notification_channel: None,
            listener: ListenerConfig::default(),
            invoke_path: DEFAULT_INVOKE_PATH.to_string(),
            runtime: RuntimeConfig::default(),
            cache: CacheConfig::default(),
            authorizer: AuthorizerConfig::default(),
            trigger: None,
            store: StoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserConfig {
    region: Option<String>,
    #[serde(default)]
    full_event_areas: HashSet<String>,
    stream_endpoint_id: Option<String>,
    notification_channel: Option<String>,
    #[serde(default)]
    listener: ListenerConfig,
    #[serde(default = "default_invoke_path")]
    invoke_path: String,
    #[serde(default)]
    runtime: RuntimeConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    authorizer: AuthorizerConfig,
    trigger: Option<TriggerConfig>,
    #[serde(default)]
    store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenerConfig {
    pub address: SocketAddr,
    /// Keep HTTP/1 connections open between requests.
    #[serde(default = "default_true")]
    pub keep_alive: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            keep_alive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_workers")]
    pub worker_threads: usize,
    #[serde(default = "default_entries")]
    pub entries: u32,
    pub sqpoll_idle: Option<u32>,
    #[serde(default)]
    pub runtime_type: RuntimeType,
    /// Pin worker `n` to core `n % cores`.
    #[serde(default)]
    pub cpu_affinity: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: default_workers(),
            entries: default_entries(),
            sqpoll_idle: None,
            runtime_type: Default::default(),
            cpu_affinity: false,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .unwrap_or(FALLBACK_PARALLELISM)
        .into()
}

fn default_invoke_path() -> String {
    DEFAULT_INVOKE_PATH.to_string()
}

define_const!(default_entries, DEFAULT_ENTRIES, u32);
define_const!(default_routing_ttl, DEFAULT_ROUTING_TTL_SECS, u64);
define_const!(default_true, true, bool);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeType {
    #[cfg(target_os = "linux")]
    IoUring,
    Legacy,
}

impl Default for RuntimeType {
    #[cfg(target_os = "linux")]
    fn default() -> Self {
        Self::IoUring
    }
    #[cfg(not(target_os = "linux"))]
    fn default() -> Self {
        Self::Legacy
    }
}

/// Tier placement and routing TTL for the cache facade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    #[serde(default = "default_routing_ttl")]
    pub routing_ttl_secs: u64,
    /// Enable the in-process memory tier.
    #[serde(default = "default_true")]
    pub memory: bool,
    /// Directory of the local persistent tier. Disabled when absent.
    pub persistent_dir: Option<PathBuf>,
}

impl CacheConfig {
    pub fn routing_ttl(&self) -> Duration {
        Duration::from_secs(self.routing_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            routing_ttl_secs: DEFAULT_ROUTING_TTL_SECS,
            memory: true,
            persistent_dir: None,
        }
    }
}

/// Selects the authorizer implementation by its registered name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizerConfig {
    pub name: String,
    /// Implementation specific options, handed over untouched.
    #[serde(default)]
    pub options: Value,
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        AuthorizerConfig {
            name: "allow_all".to_string(),
            options: Value::Null,
        }
    }
}

/// Compute target receiving identity-provider trigger events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerConfig {
    pub target: String,
    #[serde(default = "default_trigger_module")]
    pub module_name: String,
    #[serde(default = "default_trigger_class")]
    pub class_name: String,
    #[serde(default = "default_trigger_function")]
    pub function: String,
}

fn default_trigger_module() -> String {
    "event_triggers".to_string()
}

fn default_trigger_class() -> String {
    "Cognito".to_string()
}

fn default_trigger_function() -> String {
    "pre_token_generate".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Fixture file used to seed the in-memory record store.
    pub seed_path: Option<PathBuf>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file_content = crate::util::file_read_sync(path)?;
        Self::parse(&file_content, std::env::var(REGION_ENV).ok())
    }

    pub fn parse(content: &[u8], env_region: Option<String>) -> anyhow::Result<Self> {
        let user_config = parse_from_slice::<UserConfig>(content)?;
        let UserConfig {
            region,
            full_event_areas,
            stream_endpoint_id,
            notification_channel,
            listener,
            invoke_path,
            runtime,
            cache,
            authorizer,
            trigger,
            store,
        } = user_config;

        if !invoke_path.starts_with('/') {
            anyhow::bail!("invoke_path must start with '/': {invoke_path}");
        }

        Ok(Config {
            region: resolve_region(region, env_region),
            full_event_areas,
            stream_endpoint_id,
            notification_channel,
            listener,
            invoke_path,
            runtime,
            cache,
            authorizer,
            trigger,
            store,
        })
    }
}

fn resolve_region(explicit: Option<String>, env: Option<String>) -> String {
    [explicit, env]
        .into_iter()
        .flatten()
        .map(|r| r.trim().to_string())
        .find(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

pub fn parse_from_slice<T: DeserializeOwned>(content: &[u8]) -> anyhow::Result<T> {
    // read first non-space u8
    let is_json = match content
        .iter()
        .find(|&&b| b != b' ' && b != b'\r' && b != b'\n' && b != b'\t')
    {
        Some(first) => *first == b'{',
        None => false,
    };
    match is_json {
        true => serde_json::from_slice::<T>(content).map_err(Into::into),
        false => toml::from_str::<T>(&String::from_utf8_lossy(content)).map_err(Into::into),
    }
}

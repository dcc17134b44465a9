use serde::Deserialize;
use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use reverie_bridge::BridgeConfig;
use reverie_providers::OllamaConfig;

use crate::bridge_backend::DEFAULT_REPLY_TIMEOUT;
use crate::pool::DEFAULT_WORKERS;
use crate::worker::WorkerConfig;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "REVERIE_CONFIG";

/// Bridge command when `[bridge].command` is unset and no executable path
/// is known. Resolved on `PATH`.
pub const DEFAULT_BRIDGE_COMMAND: &str = "reverie";

/// Contents of `config.toml`. Every section and field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReverieConfig {
    pub store: Option<StoreSection>,
    pub worker: Option<WorkerSection>,
    pub backend: Option<BackendSection>,
    pub bridge: Option<BridgeSection>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreSection {
    /// Database file. Default: `~/.reverie/thoughts.db`.
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkerSection {
    pub count: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub connection_lookback: Option<usize>,
    pub reasoning_model: Option<String>,
    pub reasoning_max_tokens: Option<u32>,
    pub reasoning_timeout_secs: Option<u64>,
    pub fast_model: Option<String>,
    pub fast_max_tokens: Option<u32>,
    pub fast_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Workers call the HTTP inference service themselves.
    #[default]
    Direct,
    /// Each worker drives its own bridge subprocess.
    Bridge,
}

#[derive(Debug, Default, Deserialize)]
pub struct BackendSection {
    #[serde(default)]
    pub mode: BackendMode,
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BridgeSection {
    /// Default: this binary's `contemplate` mode.
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub startup_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub restart_pause_ms: Option<u64>,
    pub reply_timeout_secs: Option<u64>,
    pub buffer_capacity: Option<usize>,
    pub error_tail: Option<usize>,
    pub error_log: Option<String>,
}

/// Resolved backend choice.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendSettings {
    Direct,
    Bridge {
        config: BridgeConfig,
        reply_timeout: Duration,
    },
}

/// Explicit per-component values after defaults and `${VAR}` expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub store_path: PathBuf,
    pub workers: usize,
    pub worker: WorkerConfig,
    /// Used directly in `direct` mode and by `contemplate` in either mode.
    pub ollama: OllamaConfig,
    pub backend: BackendSettings,
}

/// Replace every `${NAME}` with the variable's value (empty when unset).
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl ReverieConfig {
    /// Load from [`config_path`]. A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {:?}: {}", path, source);
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        toml::from_str(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, source);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    #[must_use]
    pub fn resolve(&self) -> Settings {
        self.resolve_with(None)
    }

    /// Resolve with `own_exe` as the default bridge command, so bridge mode
    /// relaunches this binary even when it is not on `PATH`.
    #[must_use]
    pub fn resolve_with(&self, own_exe: Option<&Path>) -> Settings {
        let store = self.store.as_ref();
        let worker = self.worker.as_ref();
        let backend = self.backend.as_ref();

        let store_path = store
            .and_then(|s| s.path.as_deref())
            .map_or_else(|| data_dir().join("thoughts.db"), |p| PathBuf::from(expand_env_vars(p)));

        let mut worker_config = WorkerConfig::default();
        if let Some(w) = worker {
            if let Some(secs) = w.poll_interval_secs {
                worker_config.poll_interval = Duration::from_secs(secs);
            }
            if let Some(lookback) = w.connection_lookback {
                worker_config.connection_lookback = lookback;
            }
            let reasoning = &mut worker_config.reasoning;
            if let Some(model) = &w.reasoning_model {
                reasoning.model = expand_env_vars(model);
            }
            if let Some(tokens) = w.reasoning_max_tokens {
                reasoning.max_tokens = tokens;
            }
            if let Some(secs) = w.reasoning_timeout_secs {
                reasoning.timeout = Duration::from_secs(secs);
            }
            let fast = &mut worker_config.fast;
            if let Some(model) = &w.fast_model {
                fast.model = expand_env_vars(model);
            }
            if let Some(tokens) = w.fast_max_tokens {
                fast.max_tokens = tokens;
            }
            if let Some(secs) = w.fast_timeout_secs {
                fast.timeout = Duration::from_secs(secs);
            }
        }

        let mut ollama = OllamaConfig::default();
        if let Some(b) = backend {
            if let Some(url) = &b.base_url {
                ollama.base_url = expand_env_vars(url);
            }
            if let Some(secs) = b.request_timeout_secs {
                ollama.request_timeout = Duration::from_secs(secs);
            }
            if let Some(temperature) = b.temperature {
                ollama.temperature = temperature;
            }
            if let Some(top_p) = b.top_p {
                ollama.top_p = top_p;
            }
        }

        let backend = match backend.map(|b| b.mode).unwrap_or_default() {
            BackendMode::Direct => BackendSettings::Direct,
            BackendMode::Bridge => self.resolve_bridge(own_exe),
        };

        Settings {
            store_path,
            workers: worker.and_then(|w| w.count).unwrap_or(DEFAULT_WORKERS).max(1),
            worker: worker_config,
            ollama,
            backend,
        }
    }

    fn resolve_bridge(&self, own_exe: Option<&Path>) -> BackendSettings {
        let section = self.bridge.as_ref();
        let command = match section.and_then(|b| b.command.as_deref()) {
            Some(command) => expand_env_vars(command),
            None => own_exe.map_or_else(
                || DEFAULT_BRIDGE_COMMAND.to_string(),
                |exe| exe.to_string_lossy().into_owned(),
            ),
        };
        let args: Vec<String> = section
            .and_then(|b| b.args.as_ref())
            .map_or_else(
                || vec!["contemplate".to_string()],
                |args| args.iter().map(|a| expand_env_vars(a)).collect(),
            );

        let mut config = BridgeConfig::new(command).with_args(args);
        let mut reply_timeout = DEFAULT_REPLY_TIMEOUT;
        if let Some(b) = section {
            if let Some(secs) = b.startup_timeout_secs {
                config.startup_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = b.shutdown_grace_secs {
                config.shutdown_grace = Duration::from_secs(secs);
            }
            if let Some(ms) = b.restart_pause_ms {
                config.restart_pause = Duration::from_millis(ms);
            }
            if let Some(capacity) = b.buffer_capacity {
                config.buffer_capacity = capacity;
            }
            if let Some(tail) = b.error_tail {
                config.error_tail = tail;
            }
            config.error_log = b.error_log.as_deref().map(|p| PathBuf::from(expand_env_vars(p)));
            if let Some(secs) = b.reply_timeout_secs {
                reply_timeout = Duration::from_secs(secs);
            }
        }

        BackendSettings::Bridge {
            config,
            reply_timeout,
        }
    }
}

/// `~/.reverie`, or `.reverie` when there is no home directory.
#[must_use]
pub fn data_dir() -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from(".reverie"), |home| home.join(".reverie"))
}

pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".reverie").join("config.toml"))
}

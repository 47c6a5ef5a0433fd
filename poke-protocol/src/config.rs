//! Runtime configuration.
//!
//! Merged in order: built-in defaults, then a TOML file (`--config <path>`,
//! else `~/.config/pokeprotocol/config.toml` when it exists), then the
//! environment.  Command-line flags are applied last by the binary.
//!
//! Environment overrides: `POKEPROTOCOL_PORT`, `POKEPROTOCOL_TICK_MS`,
//! `POKEPROTOCOL_VERBOSE`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::message::MAX_TRAINER_LEN;
use crate::timer::RetransmitConfig;

pub const ENV_PORT: &str = "POKEPROTOCOL_PORT";
pub const ENV_TICK_MS: &str = "POKEPROTOCOL_TICK_MS";
pub const ENV_VERBOSE: &str = "POKEPROTOCOL_VERBOSE";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Host listen port (default 5001).
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,
    /// Poll cadence of the event loop.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_initial_rto_ms")]
    pub initial_rto_ms: u64,
    #[serde(default = "default_min_rto_ms")]
    pub min_rto_ms: u64,
    #[serde(default = "default_max_rto_ms")]
    pub max_rto_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub verbose: bool,
    /// Name announced in HELLO / HELLO_ACK.
    #[serde(default = "default_trainer")]
    pub trainer: String,
}

fn default_port() -> u16 {
    5001
}
fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_tick_ms() -> u64 {
    20
}
fn default_initial_rto_ms() -> u64 {
    500
}
fn default_min_rto_ms() -> u64 {
    200
}
fn default_max_rto_ms() -> u64 {
    8000
}
fn default_max_retries() -> u32 {
    3
}
fn default_trainer() -> String {
    "Trainer".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_ip: default_bind_ip(),
            tick_ms: default_tick_ms(),
            initial_rto_ms: default_initial_rto_ms(),
            min_rto_ms: default_min_rto_ms(),
            max_rto_ms: default_max_rto_ms(),
            max_retries: default_max_retries(),
            verbose: false,
            trainer: default_trainer(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location if `path` is `None`,
    /// then apply the process environment.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        Self::load_with(path, |var| std::env::var(var).ok())
    }

    /// As [`Config::load`] with an injectable environment lookup.
    pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            // An explicit path must exist.
            Some(p) => Self::from_file(p)?,
            None => match default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Config::default(),
            },
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str, origin: &Path) -> Result<Config, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("[config] loaded {}", path.display());
        Self::from_toml(&text, path)
    }

    fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env(ENV_PORT) {
            self.port = v.trim().parse().map_err(|_| ConfigError::Env {
                var: ENV_PORT,
                value: v,
            })?;
        }
        if let Some(v) = env(ENV_TICK_MS) {
            self.tick_ms = v.trim().parse().map_err(|_| ConfigError::Env {
                var: ENV_TICK_MS,
                value: v,
            })?;
        }
        if let Some(v) = env(ENV_VERBOSE) {
            self.verbose = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(ConfigError::Env {
                        var: ENV_VERBOSE,
                        value: v,
                    })
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be at least 1".into()));
        }
        if self.min_rto_ms == 0 || self.min_rto_ms > self.max_rto_ms {
            return Err(ConfigError::Invalid(format!(
                "need 0 < min_rto_ms ({}) <= max_rto_ms ({})",
                self.min_rto_ms, self.max_rto_ms
            )));
        }
        if self.trainer.trim().is_empty() {
            return Err(ConfigError::Invalid("trainer name is empty".into()));
        }
        if self.trainer.chars().count() > MAX_TRAINER_LEN {
            return Err(ConfigError::Invalid(format!(
                "trainer name is longer than {MAX_TRAINER_LEN} characters"
            )));
        }
        Ok(())
    }

    pub fn retransmit(&self) -> RetransmitConfig {
        RetransmitConfig {
            initial_rto: Duration::from_millis(self.initial_rto_ms),
            min_rto: Duration::from_millis(self.min_rto_ms),
            max_rto: Duration::from_millis(self.max_rto_ms),
            max_retries: self.max_retries,
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Address the host listens on.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }
}

fn default_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(".config/pokeprotocol/config.toml"))
}

//! Layered configuration for the binary.
//!
//! Values come from `dqn2048.toml` (or the file named by `DQN2048_CONFIG`), then from
//! `DQN2048_<SECTION>_<KEY>` environment variables, then from command line flags, each layer
//! overriding the one before it.

use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use env_2048::EnvConfig;
use serde::{Deserialize, Serialize};
use shm_2048::ChannelConfig;
use tracing_subscriber::EnvFilter;

pub const CONFIG_PATH_VAR: &str = "DQN2048_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "dqn2048.toml";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub env: EnvConfig,
    pub channel: ChannelConfig,
    pub logging: LoggingConfig,
}

/// Parses `$var` into `$target` if the lookup has a value for it.
macro_rules! env_override {
    ($lookup:ident, $target:expr, $var:literal) => {
        if let Some(value) = $lookup(concat!("DQN2048_", $var)) {
            $target = value
                .trim()
                .parse()
                .with_context(|| format!("invalid {}={value:?}", concat!("DQN2048_", $var)))?;
        }
    };
}

impl Config {
    /// Loads the config file, if there is one, and applies the environment overrides.
    ///
    /// Returns the path the values were read from alongside the config.
    pub fn load() -> Result<(Self, Option<PathBuf>)> {
        let (path, explicit) = match env::var_os(CONFIG_PATH_VAR) {
            Some(path) => (PathBuf::from(path), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let (mut config, source) = if path.exists() {
            (Self::load_from_path(&path)?, Some(path))
        } else if explicit {
            bail!("{CONFIG_PATH_VAR}={} does not exist", path.display());
        } else {
            (Self::default(), None)
        };

        config.apply_env_overrides(|var| env::var(var).ok())?;

        Ok((config, source))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Applies `DQN2048_<SECTION>_<KEY>` overrides, looking each variable up through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        env_override!(lookup, self.env.num_envs, "ENV_NUM_ENVS");
        env_override!(lookup, self.env.auto_reset, "ENV_AUTO_RESET");
        env_override!(lookup, self.env.spawn.two_probability_min, "ENV_SPAWN_TWO_PROBABILITY_MIN");
        env_override!(lookup, self.env.spawn.two_probability_max, "ENV_SPAWN_TWO_PROBABILITY_MAX");
        env_override!(lookup, self.env.reward.c_empty, "ENV_REWARD_C_EMPTY");
        env_override!(lookup, self.env.reward.c_mono, "ENV_REWARD_C_MONO");
        env_override!(lookup, self.env.reward.c_corner, "ENV_REWARD_C_CORNER");
        env_override!(lookup, self.channel.name, "CHANNEL_NAME");
        env_override!(lookup, self.channel.response_timeout_ms, "CHANNEL_RESPONSE_TIMEOUT_MS");
        env_override!(lookup, self.channel.action_timeout_ms, "CHANNEL_ACTION_TIMEOUT_MS");
        env_override!(lookup, self.channel.poll_interval_ms, "CHANNEL_POLL_INTERVAL_MS");
        env_override!(lookup, self.logging.level, "LOGGING_LEVEL");

        // An empty seed switches back to entropy.
        if let Some(value) = lookup("DQN2048_ENV_SEED") {
            self.env.seed = match value.trim() {
                "" => None,
                seed => Some(
                    seed.parse()
                        .with_context(|| format!("invalid DQN2048_ENV_SEED={value:?}"))?,
                ),
            };
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.env.validate().context("invalid [env] section")?;

        if self.channel.name.trim_start_matches('/').is_empty() {
            bail!("channel.name must not be empty");
        }

        if self.channel.response_timeout_ms == 0 || self.channel.action_timeout_ms == 0 {
            bail!("channel timeouts must be positive");
        }

        if self.channel.poll_interval_ms == 0 {
            bail!("channel.poll_interval_ms must be positive");
        }

        EnvFilter::try_new(&self.logging.level)
            .with_context(|| format!("invalid logging.level {:?}", self.logging.level))?;

        Ok(())
    }
}

use std::net::{Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::core::domain::{CompilationLimits, ExecutionLimits};

const ADDR_VAR: &str = "EXECBOX_ADDR";
const WORKSPACE_ROOT_VAR: &str = "EXECBOX_WORKSPACE_ROOT";
const EXECUTION_TIMEOUT_VAR: &str = "EXECBOX_EXECUTION_TIMEOUT_MS";
const COMPILE_TIMEOUT_VAR: &str = "EXECBOX_COMPILE_TIMEOUT_MS";
const INITIAL_SETTLE_VAR: &str = "EXECBOX_INITIAL_SETTLE_MS";
const INPUT_SETTLE_VAR: &str = "EXECBOX_INPUT_SETTLE_MS";
const RETENTION_GRACE_VAR: &str = "EXECBOX_RETENTION_GRACE_MS";
const MAX_OUTPUT_VAR: &str = "EXECBOX_MAX_OUTPUT_BYTES";
const PARALLELISM_VAR: &str = "EXECBOX_BATTERY_PARALLELISM";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub struct SandboxConfig {
    pub addr: SocketAddr,
    pub workspace_root: PathBuf,
    pub execution_timeout: Duration,
    pub compile_timeout: Duration,
    pub initial_settle: Duration,
    pub input_settle: Duration,
    pub retention_grace: Duration,
    pub max_output_bytes: usize,
    pub battery_parallelism: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv6Addr::LOCALHOST, 50051)),
            workspace_root: std::env::temp_dir().join("execbox"),
            execution_timeout: Duration::from_millis(10_000),
            compile_timeout: Duration::from_millis(30_000),
            initial_settle: Duration::from_millis(300),
            input_settle: Duration::from_millis(500),
            retention_grace: Duration::from_millis(60_000),
            max_output_bytes: 1024 * 1024,
            battery_parallelism: 4,
        }
    }
}

impl SandboxConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the config from `lookup`, falling back to defaults for unset
    /// variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            addr: parse(&lookup, ADDR_VAR)?.unwrap_or(defaults.addr),
            workspace_root: lookup(WORKSPACE_ROOT_VAR)
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            execution_timeout: millis(&lookup, EXECUTION_TIMEOUT_VAR)?
                .unwrap_or(defaults.execution_timeout),
            compile_timeout: millis(&lookup, COMPILE_TIMEOUT_VAR)?
                .unwrap_or(defaults.compile_timeout),
            initial_settle: millis(&lookup, INITIAL_SETTLE_VAR)?.unwrap_or(defaults.initial_settle),
            input_settle: millis(&lookup, INPUT_SETTLE_VAR)?.unwrap_or(defaults.input_settle),
            retention_grace: millis(&lookup, RETENTION_GRACE_VAR)?
                .unwrap_or(defaults.retention_grace),
            max_output_bytes: positive(&lookup, MAX_OUTPUT_VAR)?
                .unwrap_or(defaults.max_output_bytes),
            battery_parallelism: positive(&lookup, PARALLELISM_VAR)?
                .unwrap_or(defaults.battery_parallelism),
        })
    }

    pub fn compilation_limits(&self) -> CompilationLimits {
        CompilationLimits {
            time_ms: self.compile_timeout.as_millis() as u64,
        }
    }

    pub fn execution_limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            time_ms: self.execution_timeout.as_millis() as u64,
            max_output_bytes: self.max_output_bytes,
        }
    }
}

fn parse<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        })
}

fn positive<F>(lookup: &F, var: &'static str) -> Result<Option<usize>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse::<F, usize>(lookup, var)? {
        Some(0) => Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        other => Ok(other),
    }
}

fn millis<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse::<F, u64>(lookup, var)?.map(Duration::from_millis))
}

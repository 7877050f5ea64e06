//! Configuration data model — §3.
//!
//! Two layers live side by side: `Raw*` types deserialize the TOML file
//! verbatim (`#[serde(default)]` everywhere optional), and the resolved
//! `*Config`/`*Ir` types hold the expansion pipeline's output. Every
//! `expanded_*` field is populated exactly once during Load and is
//! read-only thereafter.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

pub const RESERVED_ENV_PREFIX: &str = "__RUNNER_";

/// `[global]`, as it appears in the TOML source.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawGlobalConfig {
    pub timeout: Option<u32>,
    pub workdir: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub verify_files: Vec<String>,
    pub env_allowlist: Option<Vec<String>>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub skip_standard_paths: bool,
    pub max_output_size: Option<u64>,
    #[serde(default)]
    pub stop_on_error: Option<bool>,
}

/// `[[groups]]`, as it appears in the TOML source.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawCommandGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub dependency: Vec<String>,
    #[serde(default)]
    pub tempdir: bool,
    pub workdir: Option<String>,
    #[serde(default)]
    pub verify_files: Vec<String>,
    pub env_allowlist: Option<Vec<String>>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub stop_on_error: Option<bool>,
    #[serde(default)]
    pub grants_network: bool,
    #[serde(default)]
    pub commands: Vec<RawCommand>,
}

/// `[[groups.commands]]`, as it appears in the TOML source.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawCommand {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    pub dir: Option<String>,
    #[serde(default)]
    pub privileged: bool,
    pub timeout: Option<u32>,
    pub output: Option<RawOutputSpec>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawOutputSpec {
    pub path: String,
    pub max_size: Option<u64>,
}

/// Top-level raw document: `[global]`, `[[groups]]`, and optional `include`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    pub global: RawGlobalConfig,
    #[serde(default)]
    pub groups: Vec<RawCommandGroup>,
    #[serde(default)]
    pub include: Vec<String>,
}

/// `EnvKey` — validated to match `^[A-Za-z_][A-Za-z0-9_]*$` and to not use
/// the reserved `__RUNNER_` prefix before it is ever inserted into a map.
pub type EnvKey = String;

/// Resolved `global` scope, produced by the Config Loader.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub timeout_seconds: u32,
    pub workdir: Option<PathBuf>,
    pub log_level: LogLevel,
    pub verify_files: Vec<String>,
    pub expanded_verify_files: Vec<PathBuf>,
    pub env_allowlist: Option<Vec<EnvKey>>,
    pub env: Vec<String>,
    pub expanded_env: HashMap<EnvKey, String>,
    pub skip_standard_paths: bool,
    pub max_output_size: u64,
    pub stop_on_error: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            timeout_seconds: 3600,
            workdir: None,
            log_level: LogLevel::Info,
            verify_files: Vec::new(),
            expanded_verify_files: Vec::new(),
            env_allowlist: None,
            env: Vec::new(),
            expanded_env: HashMap::new(),
            skip_standard_paths: false,
            max_output_size: 10 * 1024 * 1024,
            stop_on_error: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Resolved `[[groups]]` entry.
#[derive(Debug, Clone)]
pub struct CommandGroup {
    pub name: String,
    pub description: String,
    pub priority: i32,
    pub dependencies: Vec<String>,
    pub tempdir: bool,
    pub workdir: Option<PathBuf>,
    pub env_allowlist: Option<Vec<EnvKey>>,
    pub env: Vec<String>,
    pub expanded_env: HashMap<EnvKey, String>,
    pub verify_files: Vec<String>,
    pub expanded_verify_files: Vec<PathBuf>,
    pub stop_on_error: bool,
    pub grants_network: bool,
    pub commands: Vec<Command>,
}

/// Resolved `[[groups.commands]]` entry.
#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub description: String,
    pub cmd: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub expanded_cmd: PathBuf,
    pub expanded_args: Vec<String>,
    pub expanded_env: HashMap<EnvKey, String>,
    pub dir: Option<String>,
    pub privileged: bool,
    pub timeout: Option<u32>,
    pub output: Option<CapturedOutputSpec>,
}

#[derive(Debug, Clone)]
pub struct CapturedOutputSpec {
    pub path: PathBuf,
    pub max_bytes: u64,
}

/// The fully resolved, immutable configuration IR. Produced in one pass by
/// the Config Loader and read-only for the rest of the process's life.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub global: GlobalConfig,
    pub groups: Vec<CommandGroup>,
    /// ISO-8601 UTC timestamp and PID captured once at Load time, the
    /// lowest-precedence defined scope (`AutoEnv`).
    pub auto_env: HashMap<EnvKey, String>,
}

impl ResolvedConfig {
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&CommandGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

/// `^[A-Za-z_][A-Za-z0-9_]*$`, matching §3's `EnvKey` definition.
#[must_use]
pub fn is_valid_env_key_syntax(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

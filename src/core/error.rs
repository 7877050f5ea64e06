//! Error taxonomy for cmdguard.
//!
//! Every fallible operation returns one of the families below instead of a
//! single flat error type, so callers can match on *kind* (validation vs.
//! integrity vs. privilege) while still carrying a structured context chain
//! (phase/scope/variable/path) for diagnostics. `main()` matches on
//! [`CmdGuardError`] directly to pick an exit code; nothing upstream of it
//! needs a type-erased error wrapper.

use std::fmt;
use std::path::PathBuf;

/// One frame of "where this happened", accumulated as an error propagates
/// up through Load/Verify/Expand/Analyze/Execute.
#[derive(Debug, Clone, Default)]
pub struct ContextFrame {
    pub phase: Option<String>,
    pub scope: Option<String>,
    pub variable: Option<String>,
    pub path: Option<PathBuf>,
}

impl ContextFrame {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    #[must_use]
    pub fn variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = Some(variable.into());
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for ContextFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(p) = &self.phase {
            parts.push(format!("phase={p}"));
        }
        if let Some(s) = &self.scope {
            parts.push(format!("scope={s}"));
        }
        if let Some(v) = &self.variable {
            parts.push(format!("variable={v}"));
        }
        if let Some(p) = &self.path {
            parts.push(format!("path={}", p.display()));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// A chain of [`ContextFrame`]s, innermost first.
#[derive(Debug, Clone, Default)]
pub struct ContextChain(pub Vec<ContextFrame>);

impl ContextChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: ContextFrame) {
        self.0.push(frame);
    }
}

impl fmt::Display for ContextChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " <- ")?;
            }
            write!(f, "[{frame}]")?;
        }
        Ok(())
    }
}

/// TOML parse failure, bad KEY syntax, reserved prefix, duplicate env key,
/// dependency cycle, residual `${...}` after expansion.
#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("failed to parse config: {0}")]
    TomlParse(String),
    #[error("invalid env key '{0}': must match ^[A-Za-z_][A-Za-z0-9_]*$")]
    InvalidKeySyntax(String),
    #[error("env key '{0}' uses the reserved __RUNNER_ prefix")]
    ReservedPrefix(String),
    #[error("duplicate env variable '{0}' in the same scope")]
    DuplicateEnvVariable(String),
    #[error("group dependency cycle detected among: {0:?}")]
    DependencyCycle(Vec<String>),
    #[error("unresolved variable reference remains in '{field}': {value}")]
    ResidualReference { field: String, value: String },
    #[error("duplicate group name '{0}'")]
    DuplicateGroupName(String),
    #[error("duplicate command name '{0}' in group '{1}'")]
    DuplicateCommandName(String, String),
    #[error("unknown group '{0}' named in dependency list")]
    UnknownDependency(String),
    #[error("invalid timeout value: {0}")]
    InvalidTimeout(String),
}

/// Failures from the six-phase variable expansion pipeline.
#[derive(thiserror::Error, Debug)]
pub enum ExpansionError {
    #[error("variable '{0}' not found")]
    VariableNotFound(String),
    #[error("circular reference detected while expanding '{0}'")]
    CircularReference(String),
    #[error("'{0}' is not in the effective allowlist for this scope")]
    NotInAllowlist(String),
    #[error("invalid escape sequence '\\{0}'")]
    InvalidEscapeSequence(char),
    #[error("invalid variable format near: {0}")]
    InvalidVariableFormat(String),
}

/// File-integrity and TOCTOU-safety failures.
#[derive(thiserror::Error, Debug)]
pub enum IntegrityError {
    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("no hash entry recorded for {0}")]
    MissingHashEntry(PathBuf),
    #[error("hash store is not safe to use: {0}")]
    HashStoreNotSafe(String),
    #[error("refusing to follow symlink at {0}")]
    SymlinkDisallowed(PathBuf),
    #[error("unsafe (world-writable) parent directory for {0}")]
    UnsafeParent(PathBuf),
    #[error("{0} not found")]
    NotFound(PathBuf),
    #[error("permission denied reading {0}")]
    PermissionDenied(PathBuf),
    #[error("{path} exceeds the maximum allowed read size of {limit} bytes")]
    FileTooLarge { path: PathBuf, limit: u64 },
}

/// Privilege-lifecycle failures. `RestorationFailed` is always fatal.
#[derive(thiserror::Error, Debug)]
pub enum PrivilegeError {
    #[error("privileged execution is not available (not root, and no valid setuid bit)")]
    PrivilegedExecutionNotAvailable,
    #[error("failed to elevate: {0}")]
    ElevationFailed(String),
    #[error("failed to restore original privileges: {0}")]
    RestorationFailed(String),
}

/// Static risk-analysis policy failures.
#[derive(thiserror::Error, Debug)]
pub enum RiskPolicyError {
    #[error("binary contains syscalls that could not be statically resolved")]
    UnknownSyscallsPresent,
    #[error("binary is capable of network syscalls and the group did not declare this")]
    NetworkNotDeclared,
    #[error("unsupported architecture (ELF e_machine = {0:#x})")]
    UnsupportedArchitecture(u16),
}

/// Runtime execution failures.
#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("binary not found: {0}")]
    BinaryNotFound(String),
    #[error("command timed out after {0}s")]
    Timeout(u32),
    #[error("command exited with non-zero status: {0}")]
    NonZeroExit(i32),
    #[error("captured output exceeded the configured maximum size")]
    OutputTooLarge,
    #[error("failed to spawn command: {0}")]
    SpawnFailed(String),
}

/// Unexpected I/O / OS-level failures that don't fit another family.
#[derive(thiserror::Error, Debug)]
#[error("system error: {0}")]
pub struct SystemError(pub String);

impl From<std::io::Error> for SystemError {
    fn from(e: std::io::Error) -> Self {
        SystemError(e.to_string())
    }
}

/// The top-level sum type every cmdguard operation ultimately returns.
#[derive(thiserror::Error, Debug)]
pub enum CmdGuardError {
    #[error("{source}\n  context: {context}")]
    Validation {
        #[source]
        source: ValidationError,
        context: ContextChain,
    },
    #[error("{source}\n  context: {context}")]
    Expansion {
        #[source]
        source: ExpansionError,
        context: ContextChain,
    },
    #[error("{source}\n  context: {context}")]
    Integrity {
        #[source]
        source: IntegrityError,
        context: ContextChain,
    },
    #[error("{source}\n  context: {context}")]
    Privilege {
        #[source]
        source: PrivilegeError,
        context: ContextChain,
    },
    #[error("{source}\n  context: {context}")]
    RiskPolicy {
        #[source]
        source: RiskPolicyError,
        context: ContextChain,
    },
    #[error("{source}\n  context: {context}")]
    Execution {
        #[source]
        source: ExecutionError,
        context: ContextChain,
    },
    #[error("{source}\n  context: {context}")]
    System {
        #[source]
        source: SystemError,
        context: ContextChain,
    },
}

impl CmdGuardError {
    /// Ordering used to compute "the highest-severity class observed" for
    /// the final process exit code (spec §7). Higher is more severe.
    #[must_use]
    pub fn severity(&self) -> u8 {
        match self {
            CmdGuardError::Execution { .. } => 1,
            CmdGuardError::RiskPolicy { .. } => 2,
            CmdGuardError::Integrity { .. } => 3,
            CmdGuardError::Validation { .. } | CmdGuardError::Expansion { .. } => 4,
            CmdGuardError::Privilege { .. } => 5,
            CmdGuardError::System { .. } => 6,
        }
    }

    #[must_use]
    pub fn context_mut(&mut self) -> &mut ContextChain {
        match self {
            CmdGuardError::Validation { context, .. }
            | CmdGuardError::Expansion { context, .. }
            | CmdGuardError::Integrity { context, .. }
            | CmdGuardError::Privilege { context, .. }
            | CmdGuardError::RiskPolicy { context, .. }
            | CmdGuardError::Execution { context, .. }
            | CmdGuardError::System { context, .. } => context,
        }
    }

    #[must_use]
    pub fn with_frame(mut self, frame: ContextFrame) -> Self {
        self.context_mut().push(frame);
        self
    }
}

macro_rules! from_impl {
    ($variant:ident, $err:ty) => {
        impl From<$err> for CmdGuardError {
            fn from(source: $err) -> Self {
                CmdGuardError::$variant {
                    source,
                    context: ContextChain::new(),
                }
            }
        }
    };
}

from_impl!(Validation, ValidationError);
from_impl!(Expansion, ExpansionError);
from_impl!(Integrity, IntegrityError);
from_impl!(Privilege, PrivilegeError);
from_impl!(RiskPolicy, RiskPolicyError);
from_impl!(Execution, ExecutionError);
from_impl!(System, SystemError);

impl From<std::io::Error> for CmdGuardError {
    fn from(e: std::io::Error) -> Self {
        CmdGuardError::from(SystemError::from(e))
    }
}

pub type Result<T> = std::result::Result<T, CmdGuardError>;

/// Redact a value that may contain secret material before it is formatted
/// into an error message or log line (spec §7: "No secret values appear in
/// error text").
#[must_use]
pub fn redact(_value: &str) -> &'static str {
    "<redacted>"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_chain_formats_frames_in_order() {
        let mut chain = ContextChain::new();
        chain.push(ContextFrame::new().phase("load").scope("global"));
        chain.push(ContextFrame::new().variable("HOME"));
        let rendered = chain.to_string();
        assert!(rendered.contains("phase=load"));
        assert!(rendered.contains("variable=HOME"));
        assert!(rendered.find("phase=load").unwrap() < rendered.find("variable=HOME").unwrap());
    }

    #[test]
    fn severity_orders_privilege_and_system_above_validation() {
        let v: CmdGuardError = ValidationError::DuplicateGroupName("g".into()).into();
        let p: CmdGuardError = PrivilegeError::RestorationFailed("boom".into()).into();
        assert!(p.severity() > v.severity());
    }

    #[test]
    fn redact_never_echoes_input() {
        assert_eq!(redact("super-secret-token"), "<redacted>");
    }
}

//! Privilege Manager — §4.4.
//!
//! The only public elevated-execution primitive is [`with_privileges`]. It
//! is deliberately narrow: callers name an [`OperationTag`] and a closure,
//! never a raw `seteuid`.

use std::cell::Cell;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use rustix::process::{getuid, Uid};

use crate::core::error::{CmdGuardError, PrivilegeError, Result};
use crate::core::metrics::{MetricsSnapshot, PrivilegeMetrics};

/// Enumerates the allowed elevated uses. Every elevation is logged with its
/// tag via `tracing::info!`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationTag {
    FileHashCalculation,
    CommandExecution,
    FileAccess,
    HealthCheck,
}

impl OperationTag {
    fn as_str(self) -> &'static str {
        match self {
            OperationTag::FileHashCalculation => "file_hash_calculation",
            OperationTag::CommandExecution => "command_execution",
            OperationTag::FileAccess => "file_access",
            OperationTag::HealthCheck => "health_check",
        }
    }
}

static ELEVATION_LOCK: Mutex<()> = Mutex::new(());
static METRICS: OnceLock<PrivilegeMetrics> = OnceLock::new();

thread_local! {
    /// Count of `with_privileges` calls currently on this thread's stack.
    /// Only the outermost call takes `ELEVATION_LOCK`; nested calls
    /// (composition, e.g. FileAccess called from within CommandExecution)
    /// proceed without re-locking.
    static REENTRANCY: Cell<u32> = const { Cell::new(0) };
}

fn metrics_cell() -> &'static PrivilegeMetrics {
    METRICS.get_or_init(PrivilegeMetrics::new)
}

/// Read-only access to the process-wide elevation metrics.
#[must_use]
pub fn metrics() -> MetricsSnapshot {
    metrics_cell().snapshot()
}

/// Native root: both real and effective UID are 0.
fn is_native_root() -> bool {
    getuid().is_root() && rustix::process::geteuid().is_root()
}

/// Setuid-root binary: effective UID is 0, real UID is not, and the
/// executable on disk is owned by root with the setuid bit set.
fn is_valid_setuid_binary() -> bool {
    if !rustix::process::geteuid().is_root() || getuid().is_root() {
        return false;
    }
    let Ok(exe) = std::env::current_exe() else {
        return false;
    };
    let Ok(meta) = std::fs::metadata(&exe) else {
        return false;
    };
    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    meta.uid() == 0 && meta.permissions().mode() & 0o4000 != 0
}

fn elevation_available() -> bool {
    is_native_root() || is_valid_setuid_binary()
}

/// RAII scope guard restoring the original EUID on every exit path,
/// including unwinding. Never cloned or stored — created and dropped
/// entirely within [`with_privileges`].
struct PrivilegeGuard {
    /// `None` under native root, where elevation/restoration are no-ops.
    original_euid: Option<Uid>,
    _lock: Option<std::sync::MutexGuard<'static, ()>>,
    started: Instant,
}

impl PrivilegeGuard {
    fn acquire(op: OperationTag) -> std::result::Result<Self, PrivilegeError> {
        if !elevation_available() {
            return Err(PrivilegeError::PrivilegedExecutionNotAvailable);
        }

        let depth = REENTRANCY.with(|c| {
            let d = c.get();
            c.set(d + 1);
            d
        });

        let lock = if depth == 0 {
            Some(ELEVATION_LOCK.lock().unwrap_or_else(|p| p.into_inner()))
        } else {
            None
        };

        if is_native_root() {
            tracing::info!(op = op.as_str(), mode = "native_root", "elevating");
            return Ok(PrivilegeGuard {
                original_euid: None,
                _lock: lock,
                started: Instant::now(),
            });
        }

        let original = getuid();

        if depth == 0 {
            tracing::info!(op = op.as_str(), mode = "setuid", "elevating");
            let rc = unsafe { libc::seteuid(0) };
            if rc != 0 {
                REENTRANCY.with(|c| c.set(c.get().saturating_sub(1)));
                return Err(PrivilegeError::ElevationFailed(
                    std::io::Error::last_os_error().to_string(),
                ));
            }
        } else {
            // Already effective-root thanks to the outer guard; skip the
            // syscall entirely so composition never re-elevates or
            // de-elevates mid-operation.
            tracing::warn!(op = op.as_str(), "re-entrant elevation; composing");
        }

        Ok(PrivilegeGuard {
            original_euid: Some(original),
            _lock: lock,
            started: Instant::now(),
        })
    }

    fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

impl Drop for PrivilegeGuard {
    fn drop(&mut self) {
        let remaining = REENTRANCY.with(|c| {
            let d = c.get().saturating_sub(1);
            c.set(d);
            d
        });

        let Some(original) = self.original_euid else {
            return;
        };

        // Composition: an outer call is still mid-operation until the
        // reentrancy count bottoms out. Only the guard whose drop brings it
        // back to zero actually de-elevates the process.
        if remaining != 0 {
            return;
        }

        let rc = unsafe { libc::seteuid(original.as_raw()) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            tracing::error!(error = %err, "FATAL: failed to restore original privileges");
            eprintln!("cmdguard: FATAL: failed to restore original privileges: {err}");
            #[cfg(target_os = "linux")]
            unsafe {
                libc::syslog(
                    libc::LOG_CRIT,
                    b"cmdguard: failed to restore privileges after elevation\0".as_ptr().cast(),
                );
            }
            std::process::exit(1);
        }
    }
}

/// Run `f` with the effective UID elevated to root, then restore it on
/// every exit path. `op` documents why elevation was needed and is logged.
///
/// Returns `PrivilegedExecutionNotAvailable` if this process is neither
/// native root nor a valid setuid-root binary. A panic inside `f` still
/// restores the EUID (via `Drop`) before the panic continues to unwind.
pub fn with_privileges<T>(
    op: OperationTag,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    metrics_cell().record_attempt();

    let guard = match PrivilegeGuard::acquire(op) {
        Ok(g) => g,
        Err(e) => {
            metrics_cell().record_failure(&e.to_string());
            return Err(CmdGuardError::from(e));
        }
    };

    let result = f();

    match &result {
        Ok(_) => metrics_cell().record_success(guard.elapsed()),
        Err(e) => metrics_cell().record_failure(&e.to_string()),
    }

    drop(guard);
    result
}

/// `with_privileges(HealthCheck, || assert EUID==0)`. Used at startup in
/// verbose modes to confirm elevation actually works before the run begins.
pub fn health_check() -> Result<()> {
    with_privileges(OperationTag::HealthCheck, || {
        if rustix::process::geteuid().is_root() {
            Ok(())
        } else {
            Err(CmdGuardError::from(PrivilegeError::ElevationFailed(
                "EUID is not 0 after elevation".to_string(),
            )))
        }
    })
}

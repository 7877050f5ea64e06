//! Executor — §4.9.
//!
//! Runs one already-resolved [`Command`] end to end: re-confirms the
//! binary's path, verifies its hash, runs the (cached) risk analysis and
//! applies policy, builds and spawns the child process, and collects its
//! outcome. Never interprets its own environment — it is a pure consumer
//! of the Config Loader's IR.

use std::collections::HashMap;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::config::model::{CapturedOutputSpec, Command, CommandGroup, GlobalConfig};
use crate::core::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::core::error::{CmdGuardError, ExecutionError, Result, RiskPolicyError};
use crate::core::hash_store::HashStore;
use crate::core::privilege::{self, OperationTag};
use crate::core::validator;
use crate::risk::{AnalysisCache, AnalysisConfig};

/// What running one command actually produced. `exit_code` is `None` only
/// when the process was killed (timeout or signal) without ever reporting
/// a status.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
    pub timed_out: bool,
}

impl ExecutionOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Step 1: the command path was already resolved to an absolute path at
/// Load time; re-confirm it still resolves, under elevation if privileged,
/// so a privileged command sees root's view of the filesystem rather than
/// a stale Load-time snapshot.
fn reconfirm_cmd_path(cmd: &Command) -> Result<PathBuf> {
    let path = cmd.expanded_cmd.clone();
    if !path.is_absolute() {
        return Err(ExecutionError::BinaryNotFound(path.display().to_string()).into());
    }

    if cmd.privileged {
        let check_path = path.clone();
        privilege::with_privileges(OperationTag::FileAccess, move || {
            if check_path.exists() {
                Ok(())
            } else {
                Err(ExecutionError::BinaryNotFound(check_path.display().to_string()).into())
            }
        })?;
    } else if !path.exists() {
        return Err(ExecutionError::BinaryNotFound(path.display().to_string()).into());
    }

    Ok(path)
}

/// Steps 2-3: verify the binary's hash, then run (or fetch cached) risk
/// analysis and apply the privileged+high-risk policy.
fn verify_and_assess(
    store: &HashStore,
    cache: &AnalysisCache,
    path: &Path,
    privileged: bool,
    grants_network: bool,
    skip_standard_paths: bool,
) -> Result<()> {
    let read = |path: &Path| {
        validator::verify_and_read_with_digest(store, path, skip_standard_paths, u64::MAX / 2)
            .map_err(CmdGuardError::from)
    };

    let (bytes, digest_hex) = if privileged {
        let path = path.to_path_buf();
        privilege::with_privileges(OperationTag::FileHashCalculation, move || read(&path))?
    } else {
        read(path)?
    };

    let analysis = match crate::risk::analyze_binary(&bytes, path, &digest_hex, cache, &AnalysisConfig::default()) {
        Ok(result) => result,
        Err(CmdGuardError::RiskPolicy {
            source: RiskPolicyError::UnsupportedArchitecture(_),
            ..
        }) => {
            // Unknown architectures are treated as high-risk by policy but
            // are not themselves analyzed.
            crate::risk::SyscallAnalysisResult {
                schema_version: crate::risk::analyzer::SCHEMA_VERSION,
                architecture_tag: "unknown".to_string(),
                detected: Vec::new(),
                has_unknown: true,
                is_high_risk: true,
            }
        }
        Err(e) => return Err(e),
    };

    if privileged && analysis.is_high_risk && !grants_network {
        let source = if analysis.has_unknown {
            RiskPolicyError::UnknownSyscallsPresent
        } else {
            RiskPolicyError::NetworkNotDeclared
        };
        return Err(source.into());
    }

    Ok(())
}

fn resolve_workdir(
    command: &Command,
    group: &CommandGroup,
    global: &GlobalConfig,
    group_tempdir: Option<&Path>,
) -> Option<PathBuf> {
    command
        .dir
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| group.workdir.clone())
        .or_else(|| global.workdir.clone())
        .or_else(|| if group.tempdir { group_tempdir.map(Path::to_path_buf) } else { None })
}

fn merged_env(global: &GlobalConfig, group: &CommandGroup, command: &Command) -> HashMap<String, String> {
    let mut env = global.expanded_env.clone();
    env.extend(group.expanded_env.clone());
    env.extend(command.expanded_env.clone());
    env
}

/// Drains `stream` into memory, stopping (and reporting `OutputTooLarge`)
/// once more than `max_bytes` have been read.
fn capture_stream(
    mut stream: impl Read + Send + 'static,
    max_bytes: u64,
) -> std::thread::JoinHandle<std::result::Result<Vec<u8>, ExecutionError>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let mut limited = (&mut stream).take(max_bytes + 1);
        limited
            .read_to_end(&mut buf)
            .map_err(|e| ExecutionError::SpawnFailed(e.to_string()))?;
        if buf.len() as u64 > max_bytes {
            return Err(ExecutionError::OutputTooLarge);
        }
        Ok(buf)
    })
}

/// Step 4-6: build the child spec, spawn it (elevated if privileged), and
/// collect its outcome, killing the whole process group on timeout.
fn spawn_and_wait(
    path: &Path,
    command: &Command,
    workdir: Option<&Path>,
    env: &HashMap<String, String>,
    timeout: Duration,
    max_output_bytes: u64,
) -> Result<ExecutionOutcome> {
    let mut cmd = StdCommand::new(path);
    cmd.args(&command.expanded_args);
    cmd.env_clear();
    cmd.envs(env);
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    // New process group so a timeout kill takes any children it spawned too.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|e| ExecutionError::SpawnFailed(e.to_string()))?;

    let pgid = child.id() as i32;
    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");
    let stdout_handle = capture_stream(stdout, max_output_bytes);
    let stderr_handle = capture_stream(stderr, max_output_bytes);

    let wait_result = child
        .wait_timeout(timeout)
        .map_err(|e| ExecutionError::SpawnFailed(e.to_string()))?;

    let (exit_code, timed_out) = match wait_result {
        Some(status) => (status.code(), false),
        None => {
            unsafe {
                libc::killpg(pgid, libc::SIGTERM);
            }
            std::thread::sleep(Duration::from_millis(200));
            let _ = child.wait_timeout(Duration::from_secs(2));
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
            let _ = child.wait();
            (None, true)
        }
    };

    let stdout = stdout_handle.join().unwrap_or(Err(ExecutionError::SpawnFailed(
        "stdout capture thread panicked".to_string(),
    )));
    let stderr = stderr_handle.join().unwrap_or(Err(ExecutionError::SpawnFailed(
        "stderr capture thread panicked".to_string(),
    )));

    let elapsed = started.elapsed();

    if timed_out {
        return Err(ExecutionError::Timeout(timeout.as_secs() as u32).into());
    }

    Ok(ExecutionOutcome {
        exit_code,
        stdout: stdout?,
        stderr: stderr?,
        elapsed,
        timed_out,
    })
}

/// Runs `command` to completion. `group_tempdir` must already exist when
/// `group.tempdir` is set — the Orchestrator owns its lifecycle, one per
/// group, reused across every command in that group.
pub fn execute(
    global: &GlobalConfig,
    group: &CommandGroup,
    command: &Command,
    group_tempdir: Option<&Path>,
    store: &HashStore,
    cache: &AnalysisCache,
    audit: &dyn AuditSink,
) -> Result<ExecutionOutcome> {
    let path = reconfirm_cmd_path(command)?;

    verify_and_assess(
        store,
        cache,
        &path,
        command.privileged,
        group.grants_network,
        global.skip_standard_paths,
    )?;

    let workdir = resolve_workdir(command, group, global, group_tempdir);
    let env = merged_env(global, group, command);
    let timeout = Duration::from_secs(u64::from(command.timeout.unwrap_or(global.timeout_seconds)));
    let max_output_bytes = command
        .output
        .as_ref()
        .map(|o: &CapturedOutputSpec| o.max_bytes)
        .unwrap_or(global.max_output_size);

    let outcome = if command.privileged {
        let path = path.clone();
        let env = env.clone();
        let workdir = workdir.clone();
        let command = command.clone();
        privilege::with_privileges(OperationTag::CommandExecution, move || {
            spawn_and_wait(&path, &command, workdir.as_deref(), &env, timeout, max_output_bytes)
        })?
    } else {
        spawn_and_wait(&path, command, workdir.as_deref(), &env, timeout, max_output_bytes)?
    };

    if let Some(spec) = &command.output {
        crate::core::safe_ops::atomic_write_file(&spec.path, &outcome.stdout)?;
    }

    audit.record(&AuditEvent {
        kind: AuditEventKind::CommandExited,
        group: Some(group.name.clone()),
        command: Some(command.name.clone()),
        detail: format!("exit_code={:?} elapsed_ms={}", outcome.exit_code, outcome.elapsed.as_millis()),
    });

    Ok(outcome)
}

//! CLI dispatch — wires `clap`'s parsed arguments into the Config Loader,
//! Hash Store, Executor, and Orchestrator. Exit codes follow §6.

pub mod args;

use std::path::Path;

use crate::config::{self, VerificationMode};
use crate::core::audit::TracingAuditSink;
use crate::core::error::CmdGuardError;
use crate::core::hash_store::HashStore;
use crate::orchestrator;
use crate::risk::AnalysisCache;

pub use args::{Cli, Commands};

/// Maps the worst [`CmdGuardError`] family observed during a run onto the
/// CLI's exit-code table. `PrivilegeError::RestorationFailed` never reaches
/// this — it already exits the process from inside `PrivilegeGuard::drop`.
fn exit_code_for_error(error: &CmdGuardError) -> i32 {
    match error {
        CmdGuardError::Validation { .. } | CmdGuardError::Expansion { .. } => 2,
        CmdGuardError::Integrity { .. } => 3,
        CmdGuardError::Privilege { .. } => 4,
        CmdGuardError::RiskPolicy { .. } | CmdGuardError::Execution { .. } | CmdGuardError::System { .. } => 1,
    }
}

fn cache_dir_for(hash_dir: &Path) -> std::path::PathBuf {
    hash_dir.join(".analysis-cache")
}

/// `run -c <config> [-g <group>] -d <hash-dir> -r <run-id> [--dry-run]`.
pub fn run(config: &Path, group: Option<&str>, hash_dir: &Path, run_id: &str, dry_run: bool) -> i32 {
    let store = match HashStore::open(hash_dir) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open hash store");
            return 3;
        }
    };

    let resolved = match config::load(config, VerificationMode::Verified(&store), run_id) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return exit_code_for_error(&e);
        }
    };

    if let Some(name) = group {
        if resolved.group(name).is_none() {
            tracing::error!(group = name, "no such group in configuration");
            return 2;
        }
    }

    if dry_run {
        print_plan(&resolved, group);
        return 0;
    }

    let cache_dir = cache_dir_for(hash_dir);
    if let Err(e) = std::fs::create_dir_all(&cache_dir) {
        tracing::error!(error = %e, "failed to create analysis cache directory");
        return 1;
    }
    let cache = AnalysisCache::open(cache_dir);
    let audit = TracingAuditSink;

    let summary = orchestrator::run(&resolved, group, &store, &cache, &audit);

    if summary.all_succeeded() {
        return 0;
    }
    if let Some(err) = summary.worst_error() {
        return exit_code_for_error(err);
    }
    if summary.any_nonzero_exit() {
        return 1;
    }
    1
}

fn print_plan(resolved: &crate::config::ResolvedConfig, only_group: Option<&str>) {
    println!("resolved plan:");
    for group in &resolved.groups {
        if only_group.is_some_and(|g| g != group.name) {
            continue;
        }
        println!(
            "  group '{}' (priority={}, dependencies={:?}, tempdir={})",
            group.name, group.priority, group.dependencies, group.tempdir
        );
        for command in &group.commands {
            println!(
                "    command '{}': {} {:?} (privileged={})",
                command.name,
                command.expanded_cmd.display(),
                command.expanded_args,
                command.privileged
            );
        }
    }
}

/// `record -c <config> -o <hash-dir> [--force]`.
pub fn record(config: &Path, hash_dir: &Path, force: bool) -> i32 {
    if let Err(e) = std::fs::create_dir_all(hash_dir) {
        tracing::error!(error = %e, "failed to create hash store directory");
        return 3;
    }
    let store = match HashStore::open(hash_dir) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open hash store");
            return 3;
        }
    };

    // The config and anything it references don't have hash entries yet,
    // so Load runs unverified; resolution still validates and expands fully.
    let resolved = match config::load(config, VerificationMode::Unverified, "record") {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return match e {
                CmdGuardError::Validation { .. } | CmdGuardError::Expansion { .. } => 2,
                _ => 3,
            };
        }
    };

    if let Err(e) = store.record(config, force) {
        tracing::error!(error = %e, "failed to record config file hash");
        return 3;
    }

    let mut failed = false;
    for path in &resolved.global.expanded_verify_files {
        if let Err(e) = store.record(path, force) {
            tracing::error!(error = %e, path = %path.display(), "failed to record hash");
            failed = true;
        }
    }
    for group in &resolved.groups {
        for path in &group.expanded_verify_files {
            if let Err(e) = store.record(path, force) {
                tracing::error!(error = %e, path = %path.display(), "failed to record hash");
                failed = true;
            }
        }
        for command in &group.commands {
            if let Err(e) = store.record(&command.expanded_cmd, force) {
                tracing::error!(error = %e, path = %command.expanded_cmd.display(), "failed to record hash");
                failed = true;
            }
        }
    }

    if failed {
        3
    } else {
        0
    }
}

/// `verify -c <config> -d <hash-dir>`.
pub fn verify(config: &Path, hash_dir: &Path) -> i32 {
    let store = match HashStore::open(hash_dir) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open hash store");
            return 3;
        }
    };

    match config::load(config, VerificationMode::Verified(&store), "verify") {
        Ok(_) => 0,
        Err(e) => {
            tracing::error!(error = %e, "verification failed");
            match e {
                CmdGuardError::Validation { .. } | CmdGuardError::Expansion { .. } => 2,
                _ => 3,
            }
        }
    }
}

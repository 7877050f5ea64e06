//! Orchestrator — §4.10.
//!
//! Walks [`CommandGroup`]s in a deterministic topological order (Kahn's
//! algorithm over `dependencies`, ties broken by `(priority, declaration
//! index)`), runs each group's commands serially through the [`Executor`],
//! and applies the failure policy from spec §4.10: a command failure
//! aborts the rest of its group; a group whose dependency did not
//! complete cleanly is skipped entirely; independent groups still run.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::config::model::{CommandGroup, ResolvedConfig};
use crate::core::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::core::error::CmdGuardError;
use crate::core::hash_store::HashStore;
use crate::executor::{self, ExecutionOutcome};
use crate::risk::AnalysisCache;

/// The outcome of one attempted command, kept for `--dry-run` reporting
/// and for building the final process exit code.
#[derive(Debug)]
pub struct CommandRunResult {
    pub group: String,
    pub command: String,
    pub outcome: std::result::Result<ExecutionOutcome, CmdGuardError>,
}

/// Whether a group ran (and how), was skipped because a dependency did not
/// complete cleanly, or was excluded by a `-g <group>` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    Completed,
    AbortedOnCommandFailure,
    SkippedDependencyFailed,
    SkippedNotSelected,
}

#[derive(Debug)]
pub struct GroupRunResult {
    pub group: String,
    pub status: GroupStatus,
    pub commands: Vec<CommandRunResult>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub groups: Vec<GroupRunResult>,
}

impl RunSummary {
    /// True iff every attempted command returned exit code 0 and no
    /// structural (`CmdGuardError`) failure occurred anywhere (spec §4.10:
    /// "Final process exit code is 0 iff every attempted command returned
    /// 0 and no structural error occurred").
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.groups.iter().all(|g| {
            matches!(g.status, GroupStatus::Completed | GroupStatus::SkippedNotSelected)
                && g.commands
                    .iter()
                    .all(|c| matches!(&c.outcome, Ok(o) if o.succeeded()))
        })
    }

    /// The most severe error observed across every command attempt, if
    /// any, used by the CLI to compute the process exit code.
    #[must_use]
    pub fn worst_error(&self) -> Option<&CmdGuardError> {
        self.groups
            .iter()
            .flat_map(|g| &g.commands)
            .filter_map(|c| c.outcome.as_ref().err())
            .max_by_key(|e| e.severity())
    }

    /// True if any attempted command exited with a non-zero status but no
    /// command produced a structural `CmdGuardError`.
    #[must_use]
    pub fn any_nonzero_exit(&self) -> bool {
        self.groups.iter().flat_map(|g| &g.commands).any(|c| {
            matches!(&c.outcome, Ok(o) if !o.succeeded())
        })
    }
}

/// Kahn's algorithm over `dependencies`, ties broken by `(priority asc,
/// declaration index asc)`. Cycles are already rejected at Load (spec
/// §4.7 step 6); an unexpected cycle here is a programmer error, not a
/// user-facing one.
fn topological_order(groups: &[CommandGroup]) -> Vec<usize> {
    let index_of: HashMap<&str, usize> =
        groups.iter().enumerate().map(|(i, g)| (g.name.as_str(), i)).collect();

    let mut indegree = vec![0usize; groups.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); groups.len()];
    for (i, g) in groups.iter().enumerate() {
        for dep in &g.dependencies {
            if let Some(&dep_idx) = index_of.get(dep.as_str()) {
                indegree[i] += 1;
                dependents[dep_idx].push(i);
            }
        }
    }

    let mut ready: Vec<usize> = (0..groups.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(groups.len());
    let mut done = vec![false; groups.len()];

    while !ready.is_empty() {
        ready.sort_by_key(|&i| (groups[i].priority, i));
        let next = ready.remove(0);
        done[next] = true;
        order.push(next);
        for &dependent in &dependents[next] {
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    // Defensive: Load already rejects cycles, but if one somehow reaches
    // here, append whatever's left in declaration order rather than
    // silently dropping groups.
    for (i, d) in done.iter().enumerate() {
        if !d {
            order.push(i);
        }
    }
    order
}

/// Run every group of `config` in dependency order. `only_group`, when
/// set, restricts execution to that single group (every other group is
/// marked `SkippedNotSelected`, not a failure) — load/verify/expand still
/// covers the whole config regardless.
#[allow(clippy::too_many_arguments)]
pub fn run(
    config: &ResolvedConfig,
    only_group: Option<&str>,
    store: &HashStore,
    cache: &AnalysisCache,
    audit: &dyn AuditSink,
) -> RunSummary {
    audit.record(&AuditEvent {
        kind: AuditEventKind::RunStarted,
        group: None,
        command: None,
        detail: format!("groups={}", config.groups.len()),
    });

    let order = topological_order(&config.groups);
    let mut succeeded: HashSet<String> = HashSet::new();
    let mut summary = RunSummary::default();

    for idx in order {
        let group = &config.groups[idx];

        if let Some(selected) = only_group {
            if group.name != selected {
                summary.groups.push(GroupRunResult {
                    group: group.name.clone(),
                    status: GroupStatus::SkippedNotSelected,
                    commands: Vec::new(),
                });
                continue;
            }
        }

        let deps_ok = group.dependencies.iter().all(|d| succeeded.contains(d));
        if !deps_ok {
            audit.record(&AuditEvent {
                kind: AuditEventKind::GroupSkipped,
                group: Some(group.name.clone()),
                command: None,
                detail: "a dependency did not complete cleanly".to_string(),
            });
            summary.groups.push(GroupRunResult {
                group: group.name.clone(),
                status: GroupStatus::SkippedDependencyFailed,
                commands: Vec::new(),
            });
            continue;
        }

        let tempdir = if group.tempdir {
            match tempfile::tempdir() {
                Ok(d) => Some(d),
                Err(e) => {
                    summary.groups.push(GroupRunResult {
                        group: group.name.clone(),
                        status: GroupStatus::AbortedOnCommandFailure,
                        commands: vec![CommandRunResult {
                            group: group.name.clone(),
                            command: String::new(),
                            outcome: Err(crate::core::error::SystemError(e.to_string()).into()),
                        }],
                    });
                    continue;
                }
            }
        } else {
            None
        };
        let tempdir_path: Option<PathBuf> = tempdir.as_ref().map(|d| d.path().to_path_buf());

        let mut results = Vec::with_capacity(group.commands.len());
        let mut aborted = false;

        for command in &group.commands {
            let outcome = executor::execute(
                &config.global,
                group,
                command,
                tempdir_path.as_deref(),
                store,
                cache,
                audit,
            );

            let command_ok = matches!(&outcome, Ok(o) if o.succeeded());
            results.push(CommandRunResult {
                group: group.name.clone(),
                command: command.name.clone(),
                outcome,
            });

            if !command_ok {
                if let Some(last) = results.last() {
                    if let Err(e) = &last.outcome {
                        audit.record(&AuditEvent {
                            kind: AuditEventKind::RiskPolicyDenied,
                            group: Some(group.name.clone()),
                            command: Some(command.name.clone()),
                            detail: e.to_string(),
                        });
                    }
                }
                if group.stop_on_error {
                    aborted = true;
                    break;
                }
            }
        }

        let group_succeeded = !aborted && results.iter().all(|c| matches!(&c.outcome, Ok(o) if o.succeeded()));
        if group_succeeded {
            succeeded.insert(group.name.clone());
        }

        summary.groups.push(GroupRunResult {
            group: group.name.clone(),
            status: if aborted { GroupStatus::AbortedOnCommandFailure } else { GroupStatus::Completed },
            commands: results,
        });
    }

    audit.record(&AuditEvent {
        kind: AuditEventKind::RunFinished,
        group: None,
        command: None,
        detail: format!("succeeded={}", summary.all_succeeded()),
    });

    summary
}

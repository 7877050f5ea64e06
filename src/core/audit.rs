//! Audit sink — the ambient logging extension point standing in for the
//! out-of-scope Slack/webhook/syslog integrations. Concrete backends for
//! those remain external; this crate ships only [`NullAuditSink`] and
//! [`TracingAuditSink`].

use std::fmt;

/// One audit-worthy event. Kept deliberately small and textual; a real
/// webhook backend would serialize this however its destination expects.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub group: Option<String>,
    pub command: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventKind {
    RunStarted,
    RunFinished,
    GroupSkipped,
    CommandExited,
    PrivilegeElevated,
    RiskPolicyDenied,
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditEventKind::RunStarted => "run_started",
            AuditEventKind::RunFinished => "run_finished",
            AuditEventKind::GroupSkipped => "group_skipped",
            AuditEventKind::CommandExited => "command_exited",
            AuditEventKind::PrivilegeElevated => "privilege_elevated",
            AuditEventKind::RiskPolicyDenied => "risk_policy_denied",
        };
        f.write_str(s)
    }
}

/// Destination for audit events. Implementations must not block the
/// caller for long — the orchestrator emits one event per group/command
/// transition on its single thread.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Default sink: discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

/// Re-emits every event through `tracing`, at a level matching its kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        match event.kind {
            AuditEventKind::RiskPolicyDenied => {
                tracing::warn!(
                    kind = %event.kind,
                    group = event.group.as_deref(),
                    command = event.command.as_deref(),
                    detail = %event.detail,
                    "audit"
                );
            }
            _ => {
                tracing::info!(
                    kind = %event.kind,
                    group = event.group.as_deref(),
                    command = event.command.as_deref(),
                    detail = %event.detail,
                    "audit"
                );
            }
        }
    }
}

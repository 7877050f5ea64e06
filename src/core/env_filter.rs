//! Environment Filter & Allowlist — §4.5.
//!
//! Resolves, once per scope, which system-environment variables may be
//! *read* during expansion. Variables defined in the config (global/group/
//! command `env`) always bypass this gate — the allowlist only restricts
//! reads from the process's inherited environment.

use std::collections::HashSet;

/// The resolved allowlist modes (§3/§4.5). `Inherit`
/// only ever appears transiently while resolving a group's raw field —
/// `resolve_for_group`/`resolve_for_global` always return one of the other
/// three variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allowlist {
    /// Global `env_allowlist` literally absent: every system-env read is
    /// permitted (spec §3: "`None` = unrestricted").
    Unrestricted,
    /// `env_allowlist = []`: no system env reads permitted.
    Reject,
    /// `env_allowlist = [A, B, ...]`: exactly these keys are permitted.
    Explicit(HashSet<String>),
}

impl Allowlist {
    #[must_use]
    pub fn explicit(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Allowlist::Explicit(keys.into_iter().map(Into::into).collect())
    }

    /// Resolve a group's raw `env_allowlist` field against the global's
    /// already-resolved allowlist. A group's absent field inherits the
    /// global's mode verbatim (spec §4.5: "not present -> inherit ->
    /// global's allowlist").
    #[must_use]
    pub fn resolve_for_group(
        raw: Option<&[String]>,
        global_effective: &Allowlist,
    ) -> Allowlist {
        match raw {
            None => global_effective.clone(),
            Some(keys) if keys.is_empty() => Allowlist::Reject,
            Some(keys) => Allowlist::explicit(keys.iter().cloned()),
        }
    }

    /// The global scope has no parent to inherit from: an absent
    /// `env_allowlist` on the global config means "unrestricted" (spec §3).
    #[must_use]
    pub fn resolve_for_global(raw: Option<&[String]>) -> Allowlist {
        match raw {
            None => Allowlist::Unrestricted,
            Some(keys) if keys.is_empty() => Allowlist::Reject,
            Some(keys) => Allowlist::explicit(keys.iter().cloned()),
        }
    }

    #[must_use]
    pub fn permits(&self, key: &str) -> bool {
        match self {
            Allowlist::Unrestricted => true,
            Allowlist::Reject => false,
            Allowlist::Explicit(keys) => keys.contains(key),
        }
    }
}

/// Reads `key` from the real process environment if `allowlist` permits it.
/// The returned value is treated as a literal by the caller — any `${...}`
/// inside it is never re-expanded.
#[must_use]
pub fn read_system_env(key: &str, allowlist: &Allowlist) -> Option<String> {
    if !allowlist.permits(key) {
        return None;
    }
    std::env::var(key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_allowlist_on_group_inherits_global() {
        let global = Allowlist::explicit(["PATH", "HOME"]);
        let resolved = Allowlist::resolve_for_group(None, &global);
        assert_eq!(resolved, global);
    }

    #[test]
    fn empty_allowlist_rejects_everything() {
        let resolved = Allowlist::resolve_for_group(Some(&[]), &Allowlist::Reject);
        assert_eq!(resolved, Allowlist::Reject);
        assert!(!resolved.permits("PATH"));
    }

    #[test]
    fn explicit_allowlist_permits_only_named_keys() {
        let resolved = Allowlist::explicit(["PATH".to_string()]);
        assert!(resolved.permits("PATH"));
        assert!(!resolved.permits("HOME"));
    }

    #[test]
    fn global_absent_allowlist_means_unrestricted() {
        assert_eq!(Allowlist::resolve_for_global(None), Allowlist::Unrestricted);
        assert!(Allowlist::Unrestricted.permits("ANYTHING_AT_ALL"));
    }

    #[test]
    fn global_empty_allowlist_still_rejects() {
        assert_eq!(Allowlist::resolve_for_global(Some(&[])), Allowlist::Reject);
    }

    #[test]
    fn read_system_env_honors_reject() {
        std::env::set_var("CMDGUARD_TEST_VAR", "secret");
        assert_eq!(read_system_env("CMDGUARD_TEST_VAR", &Allowlist::Reject), None);
        let allow = Allowlist::explicit(["CMDGUARD_TEST_VAR".to_string()]);
        assert_eq!(
            read_system_env("CMDGUARD_TEST_VAR", &allow),
            Some("secret".to_string())
        );
        std::env::remove_var("CMDGUARD_TEST_VAR");
    }
}

//! Config Loader — §4.7.
//!
//! Orchestrates the six numbered Load steps and the six-phase variable
//! expansion pipeline in one pass, producing the immutable
//! [`ResolvedConfig`] IR. Fails fast on the first error, attaching a
//! context chain (phase, scope, variable/key) as it unwinds.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::core::env_filter::Allowlist;
use crate::core::error::{CmdGuardError, ContextFrame, ExpansionError, Result, ValidationError};
use crate::core::expand::{self, ExpandedEnv, RawEnvBlock};
use crate::core::fileio;
use crate::core::hash_store::HashStore;
use crate::core::privilege::{self, OperationTag};
use crate::core::validator;
use crate::config::model::{
    is_valid_env_key_syntax, CapturedOutputSpec, Command, CommandGroup, GlobalConfig, LogLevel,
    RawCommand, RawCommandGroup, RawConfig, ResolvedConfig,
};

const MAX_CONFIG_LEN: u64 = 16 * 1024 * 1024;

/// Whether the loader must find a recorded hash entry for every file it
/// reads (`run`/`verify`) or may read files directly (`record`, where the
/// hash entries don't exist yet).
pub enum VerificationMode<'a> {
    Verified(&'a HashStore),
    Unverified,
}

fn read_config_bytes(
    path: &Path,
    mode: &VerificationMode<'_>,
    skip_standard_paths: bool,
) -> Result<Vec<u8>> {
    match mode {
        VerificationMode::Verified(store) => {
            Ok(validator::verify_and_read(store, path, skip_standard_paths, MAX_CONFIG_LEN)?)
        }
        VerificationMode::Unverified => {
            Ok(fileio::open_and_read(path, skip_standard_paths, MAX_CONFIG_LEN)?)
        }
    }
}

fn parse_toml(text: &str, path: &Path) -> Result<RawConfig> {
    toml::from_str(text).map_err(|e| {
        CmdGuardError::from(ValidationError::TomlParse(e.to_string()))
            .with_frame(ContextFrame::new().phase("parse").path(path))
    })
}

fn resolve_include_path(config_path: &Path, include: &str) -> PathBuf {
    let include_path = Path::new(include);
    if include_path.is_absolute() {
        include_path.to_path_buf()
    } else {
        config_path
            .parent()
            .map(|p| p.join(include_path))
            .unwrap_or_else(|| include_path.to_path_buf())
    }
}

/// Split one `KEY=VALUE` declaration, validating KEY's syntax and the
/// reserved `__RUNNER_` prefix (step 3).
fn parse_kv(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| CmdGuardError::from(ValidationError::InvalidKeySyntax(raw.to_string())))?;
    if !is_valid_env_key_syntax(key) {
        return Err(ValidationError::InvalidKeySyntax(key.to_string()).into());
    }
    if key.starts_with(crate::config::model::RESERVED_ENV_PREFIX) {
        return Err(ValidationError::ReservedPrefix(key.to_string()).into());
    }
    Ok((key.to_string(), value.to_string()))
}

fn build_raw_env_block(entries: &[String], scope: &str) -> Result<RawEnvBlock> {
    let mut seen = HashSet::new();
    let mut block = RawEnvBlock::default();
    for raw in entries {
        let (key, value) = parse_kv(raw)?;
        if !seen.insert(key.clone()) {
            return Err(CmdGuardError::from(ValidationError::DuplicateEnvVariable(key))
                .with_frame(ContextFrame::new().scope(scope)));
        }
        block
            .insert(key, value)
            .map_err(|e| CmdGuardError::from(expansion_to_validation(e, scope)))?;
    }
    Ok(block)
}

fn expansion_to_validation(e: ExpansionError, scope: &str) -> ValidationError {
    match e {
        ExpansionError::NotInAllowlist(key) => ValidationError::ReservedPrefix(key),
        other => ValidationError::DuplicateEnvVariable(format!("{scope}: {other}")),
    }
}

fn auto_env(run_id: &str) -> Result<HashMap<String, String>> {
    let now = jiff::Timestamp::now();
    let mut env = HashMap::new();
    env.insert(
        "__RUNNER_DATETIME".to_string(),
        now.strftime("%Y-%m-%dT%H:%M:%SZ").to_string(),
    );
    env.insert(
        "__RUNNER_PID".to_string(),
        std::process::id().to_string(),
    );
    env.insert("__RUNNER_RUN_ID".to_string(), run_id.to_string());
    Ok(env)
}

fn expand_list(
    items: &[String],
    scopes: &[&ExpandedEnv],
    allowlist: &Allowlist,
) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let mut resolve = expand::scope_resolver(scopes, allowlist);
        out.push(expand::expand_string(item, &mut resolve)?);
    }
    Ok(out)
}

fn resolve_cmd_path(cmd: &str, privileged: bool) -> Result<PathBuf> {
    let as_path = Path::new(cmd);
    if as_path.is_absolute() {
        return Ok(as_path.to_path_buf());
    }

    if privileged {
        let cmd = cmd.to_string();
        privilege::with_privileges(OperationTag::FileAccess, move || {
            which::which(&cmd)
                .map_err(|e| crate::core::error::ExecutionError::BinaryNotFound(e.to_string()).into())
        })
    } else {
        which::which(cmd)
            .map_err(|e| crate::core::error::ExecutionError::BinaryNotFound(e.to_string()).into())
    }
}

fn detect_dependency_cycle(groups: &[RawCommandGroup]) -> Result<()> {
    let names: HashSet<&str> = groups.iter().map(|g| g.name.as_str()).collect();
    for group in groups {
        for dep in &group.dependency {
            if !names.contains(dep.as_str()) {
                return Err(ValidationError::UnknownDependency(dep.clone()).into());
            }
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = groups.iter().map(|g| (g.name.as_str(), Mark::Unvisited)).collect();
    let by_name: HashMap<&str, &RawCommandGroup> =
        groups.iter().map(|g| (g.name.as_str(), g)).collect();

    fn visit<'a>(
        name: &'a str,
        by_name: &HashMap<&'a str, &'a RawCommandGroup>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(name).copied() {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                stack.push(name.to_string());
                return Err(ValidationError::DependencyCycle(stack.clone()).into());
            }
            _ => {}
        }
        marks.insert(name, Mark::InProgress);
        stack.push(name.to_string());
        if let Some(group) = by_name.get(name) {
            for dep in &group.dependency {
                visit(dep, by_name, marks, stack)?;
            }
        }
        stack.pop();
        marks.insert(name, Mark::Done);
        Ok(())
    }

    for name in names {
        let mut stack = Vec::new();
        visit(name, &by_name, &mut marks, &mut stack)?;
    }
    Ok(())
}

/// Run the full Load pipeline and return the resolved, immutable IR.
pub fn load(
    config_path: &Path,
    mode: VerificationMode<'_>,
    run_id: &str,
) -> Result<ResolvedConfig> {
    // Step 1: verify-and-read the main config.
    let bytes = read_config_bytes(config_path, &mode, false)?;
    let text = String::from_utf8(bytes)
        .map_err(|_| CmdGuardError::from(ValidationError::TomlParse("not valid UTF-8".into())))?;
    let mut raw = parse_toml(&text, config_path)?;

    // Step 2: resolve `include`s as additional group templates.
    for include in raw.include.clone() {
        let include_path = resolve_include_path(config_path, &include);
        let bytes = read_config_bytes(&include_path, &mode, raw.global.skip_standard_paths)?;
        let text = String::from_utf8(bytes).map_err(|_| {
            CmdGuardError::from(ValidationError::TomlParse("not valid UTF-8".into()))
        })?;
        let fragment = parse_toml(&text, &include_path)?;
        raw.groups.extend(fragment.groups);
    }

    // Reject duplicate group/command names up front.
    let mut seen_groups = HashSet::new();
    for group in &raw.groups {
        if !seen_groups.insert(group.name.clone()) {
            return Err(ValidationError::DuplicateGroupName(group.name.clone()).into());
        }
        let mut seen_commands = HashSet::new();
        for command in &group.commands {
            if !seen_commands.insert(command.name.clone()) {
                return Err(
                    ValidationError::DuplicateCommandName(command.name.clone(), group.name.clone())
                        .into(),
                );
            }
        }
    }

    detect_dependency_cycle(&raw.groups)?;

    let auto = auto_env(run_id)?;
    let auto_ref: &ExpandedEnv = &auto;

    // --- Phase 1: global.env ---
    let global_allowlist = Allowlist::resolve_for_global(raw.global.env_allowlist.as_deref());
    let global_raw_env = build_raw_env_block(&raw.global.env, "global")?;
    let global_expanded_env =
        expand::expand_env_block(&global_raw_env, &[auto_ref], &global_allowlist)?;

    // --- Phase 2: global.verify_files ---
    let global_expanded_verify_files = expand_list(
        &raw.global.verify_files,
        &[&global_expanded_env, auto_ref],
        &global_allowlist,
    )?
    .into_iter()
    .map(PathBuf::from)
    .collect();

    let timeout_seconds = raw.global.timeout.unwrap_or(3600);
    if timeout_seconds == 0 {
        tracing::debug!("global.timeout == 0 treated as unset; using default 3600s");
    }

    let global = GlobalConfig {
        timeout_seconds: if timeout_seconds == 0 { 3600 } else { timeout_seconds },
        workdir: raw.global.workdir.clone().map(PathBuf::from),
        log_level: raw
            .global
            .log_level
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e: String| CmdGuardError::from(ValidationError::InvalidTimeout(e)))?
            .unwrap_or(LogLevel::Info),
        verify_files: raw.global.verify_files.clone(),
        expanded_verify_files: global_expanded_verify_files,
        env_allowlist: raw.global.env_allowlist.clone(),
        env: raw.global.env.clone(),
        expanded_env: global_expanded_env.clone(),
        skip_standard_paths: raw.global.skip_standard_paths,
        max_output_size: raw.global.max_output_size.unwrap_or(10 * 1024 * 1024),
        stop_on_error: raw.global.stop_on_error.unwrap_or(true),
    };

    let mut groups = Vec::with_capacity(raw.groups.len());
    for raw_group in &raw.groups {
        groups.push(load_group(
            raw_group,
            &global_expanded_env,
            &global_allowlist,
            auto_ref,
        )?);
    }

    Ok(ResolvedConfig {
        global,
        groups,
        auto_env: auto,
    })
}

fn load_group(
    raw_group: &RawCommandGroup,
    global_expanded_env: &ExpandedEnv,
    global_allowlist: &Allowlist,
    auto_ref: &ExpandedEnv,
) -> Result<CommandGroup> {
    let frame = || ContextFrame::new().scope(raw_group.name.clone());

    let group_allowlist =
        Allowlist::resolve_for_group(raw_group.env_allowlist.as_deref(), global_allowlist);

    // --- Phase 3: group.env ---
    let group_raw_env = build_raw_env_block(&raw_group.env, &raw_group.name)
        .map_err(|e| e.with_frame(frame()))?;
    let group_expanded_env = expand::expand_env_block(
        &group_raw_env,
        &[global_expanded_env, auto_ref],
        &group_allowlist,
    )
    .map_err(|e| CmdGuardError::from(e).with_frame(frame()))?;

    // --- Phase 4: group.verify_files ---
    let group_expanded_verify_files = expand_list(
        &raw_group.verify_files,
        &[&group_expanded_env, global_expanded_env, auto_ref],
        &group_allowlist,
    )
    .map_err(|e| e.with_frame(frame()))?
    .into_iter()
    .map(PathBuf::from)
    .collect();

    let mut commands = Vec::with_capacity(raw_group.commands.len());
    for raw_command in &raw_group.commands {
        commands.push(load_command(
            raw_command,
            &raw_group.name,
            &group_expanded_env,
            global_expanded_env,
            &group_allowlist,
            auto_ref,
        )?);
    }

    Ok(CommandGroup {
        name: raw_group.name.clone(),
        description: raw_group.description.clone(),
        priority: raw_group.priority,
        dependencies: raw_group.dependency.clone(),
        tempdir: raw_group.tempdir,
        workdir: raw_group.workdir.clone().map(PathBuf::from),
        env_allowlist: raw_group.env_allowlist.clone(),
        env: raw_group.env.clone(),
        expanded_env: group_expanded_env,
        verify_files: raw_group.verify_files.clone(),
        expanded_verify_files: group_expanded_verify_files,
        stop_on_error: raw_group.stop_on_error.unwrap_or(true),
        grants_network: raw_group.grants_network,
        commands,
    })
}

fn load_command(
    raw_command: &RawCommand,
    group_name: &str,
    group_expanded_env: &ExpandedEnv,
    global_expanded_env: &ExpandedEnv,
    group_allowlist: &Allowlist,
    auto_ref: &ExpandedEnv,
) -> Result<Command> {
    let frame = || {
        ContextFrame::new()
            .scope(group_name.to_string())
            .variable(raw_command.name.clone())
    };

    // --- Phase 5: command.env ---
    let command_raw_env = build_raw_env_block(&raw_command.env, &raw_command.name)
        .map_err(|e| e.with_frame(frame()))?;
    let command_expanded_env = expand::expand_env_block(
        &command_raw_env,
        &[group_expanded_env, global_expanded_env, auto_ref],
        group_allowlist,
    )
    .map_err(|e| CmdGuardError::from(e).with_frame(frame()))?;

    // --- Phase 6: command.cmd, command.args ---
    let scopes = [&command_expanded_env, group_expanded_env, global_expanded_env, auto_ref];
    let mut resolve = expand::scope_resolver(&scopes, group_allowlist);
    let expanded_cmd_str = expand::expand_string(&raw_command.cmd, &mut resolve)
        .map_err(|e| CmdGuardError::from(e).with_frame(frame()))?;
    drop(resolve);

    let expanded_args = expand_list(&raw_command.args, &scopes, group_allowlist)
        .map_err(|e| e.with_frame(frame()))?;

    let expanded_cmd = resolve_cmd_path(&expanded_cmd_str, raw_command.privileged)
        .map_err(|e| e.with_frame(frame()))?;

    if !expanded_cmd.is_absolute() {
        return Err(
            CmdGuardError::from(ValidationError::ResidualReference {
                field: "cmd".to_string(),
                value: expanded_cmd.display().to_string(),
            })
            .with_frame(frame()),
        );
    }

    let timeout = match raw_command.timeout {
        Some(0) | None => raw_command.timeout.filter(|&t| t != 0),
        Some(t) => Some(t),
    };

    let output = raw_command
        .output
        .as_ref()
        .map(|o| CapturedOutputSpec {
            path: PathBuf::from(&o.path),
            max_bytes: o.max_size.unwrap_or(10 * 1024 * 1024),
        });

    Ok(Command {
        name: raw_command.name.clone(),
        description: raw_command.description.clone(),
        cmd: raw_command.cmd.clone(),
        args: raw_command.args.clone(),
        env: raw_command.env.clone(),
        expanded_cmd,
        expanded_args,
        expanded_env: command_expanded_env,
        dir: raw_command.dir.clone(),
        privileged: raw_command.privileged,
        timeout,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("cmdguard.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_a_minimal_config() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[global]
timeout = 120

[[groups]]
name = "diagnostics"

[[groups.commands]]
name = "list"
cmd = "/bin/ls"
args = ["-la"]
"#,
        );

        let resolved = load(&path, VerificationMode::Unverified, "run-1").unwrap();
        assert_eq!(resolved.global.timeout_seconds, 120);
        assert_eq!(resolved.groups.len(), 1);
        assert_eq!(resolved.groups[0].commands[0].expanded_cmd, PathBuf::from("/bin/ls"));
    }

    #[test]
    fn zero_timeout_is_treated_as_unset() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[global]
timeout = 0

[[groups]]
name = "g"

[[groups.commands]]
name = "c"
cmd = "/bin/true"
timeout = 0
"#,
        );
        let resolved = load(&path, VerificationMode::Unverified, "run-1").unwrap();
        assert_eq!(resolved.global.timeout_seconds, 3600);
        assert!(resolved.groups[0].commands[0].timeout.is_none());
    }

    #[test]
    fn duplicate_group_names_are_rejected() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[[groups]]
name = "dup"

[[groups]]
name = "dup"
"#,
        );
        let err = load(&path, VerificationMode::Unverified, "run-1").unwrap_err();
        assert!(matches!(
            err,
            CmdGuardError::Validation {
                source: ValidationError::DuplicateGroupName(_),
                ..
            }
        ));
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[[groups]]
name = "a"
dependency = ["b"]

[[groups]]
name = "b"
dependency = ["a"]
"#,
        );
        let err = load(&path, VerificationMode::Unverified, "run-1").unwrap_err();
        assert!(matches!(
            err,
            CmdGuardError::Validation {
                source: ValidationError::DependencyCycle(_),
                ..
            }
        ));
    }

    #[test]
    fn env_expansion_flows_global_to_group_to_command() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[global]
env = ["BASE=/srv"]

[[groups]]
name = "g"
env = ["GROUP_DIR=${BASE}/app"]

[[groups.commands]]
name = "c"
cmd = "/bin/echo"
args = ["${GROUP_DIR}/bin"]
"#,
        );
        let resolved = load(&path, VerificationMode::Unverified, "run-1").unwrap();
        let group = &resolved.groups[0];
        assert_eq!(group.expanded_env.get("GROUP_DIR").unwrap(), "/srv/app");
        assert_eq!(group.commands[0].expanded_args[0], "/srv/app/bin");
    }

    #[test]
    fn residual_undefined_variable_fails_load() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[[groups]]
name = "g"

[[groups.commands]]
name = "c"
cmd = "/bin/echo"
args = ["${MISSING}"]
"#,
        );
        assert!(load(&path, VerificationMode::Unverified, "run-1").is_err());
    }

    #[test]
    fn reserved_prefix_in_env_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[global]
env = ["__RUNNER_FOO=bar"]
"#,
        );
        let err = load(&path, VerificationMode::Unverified, "run-1").unwrap_err();
        assert!(matches!(
            err,
            CmdGuardError::Validation {
                source: ValidationError::ReservedPrefix(_),
                ..
            }
        ));
    }
}

//! End-to-end CLI tests driving the compiled `cmdguard` binary directly,
//! covering the happy path, hash-mismatch, allowlist-override, dry-run,
//! verify, and record seed scenarios.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cmdguard() -> Command {
    Command::cargo_bin("cmdguard").unwrap()
}

fn prepare_hash_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    let mut perm = std::fs::metadata(dir.path()).unwrap().permissions();
    perm.set_mode(0o700);
    std::fs::set_permissions(dir.path(), perm).unwrap();
    dir
}

fn write_executable_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    let mut perm = std::fs::metadata(path).unwrap().permissions();
    perm.set_mode(0o755);
    std::fs::set_permissions(path, perm).unwrap();
}

/// Scenario 1: happy path — global/group/command expansion chains to an
/// absolute command path, a matching hash entry, and a zero-exit child.
#[test]
fn happy_path_runs_to_completion() {
    let workdir = TempDir::new().unwrap();
    let bin_dir = workdir.path().join("opt/svc/bin");
    std::fs::create_dir_all(&bin_dir).unwrap();
    let tool = bin_dir.join("tool");
    write_executable_script(&tool, "#!/bin/sh\nexit 0\n");

    let config_path = workdir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[global]
env = ["BASE_DIR={base}"]

[[groups]]
name = "deploy"
env = ["APP=${{BASE_DIR}}/svc"]

[[groups.commands]]
name = "run-tool"
cmd = "${{APP}}/bin/tool"
args = ["--log", "${{APP}}/log"]
"#,
            base = workdir.path().join("opt").display()
        ),
    )
    .unwrap();

    let hash_dir = prepare_hash_dir();
    cmdguard()
        .args(["record", "-c"])
        .arg(&config_path)
        .arg("-o")
        .arg(hash_dir.path())
        .assert()
        .success();

    cmdguard()
        .args(["run", "-c"])
        .arg(&config_path)
        .arg("-d")
        .arg(hash_dir.path())
        .arg("-r")
        .arg("run-001")
        .assert()
        .success();
}

/// Scenario 2: a tampered binary fails hash verification and the process
/// exits 3.
#[test]
fn tampered_binary_fails_with_hash_mismatch_exit_code() {
    let workdir = TempDir::new().unwrap();
    let bin_dir = workdir.path().join("opt/svc/bin");
    std::fs::create_dir_all(&bin_dir).unwrap();
    let tool = bin_dir.join("tool");
    write_executable_script(&tool, "#!/bin/sh\nexit 0\n");

    let config_path = workdir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[global]
env = ["BASE_DIR={base}"]

[[groups]]
name = "deploy"
env = ["APP=${{BASE_DIR}}/svc"]

[[groups.commands]]
name = "run-tool"
cmd = "${{APP}}/bin/tool"
"#,
            base = workdir.path().join("opt").display()
        ),
    )
    .unwrap();

    let hash_dir = prepare_hash_dir();
    cmdguard()
        .args(["record", "-c"])
        .arg(&config_path)
        .arg("-o")
        .arg(hash_dir.path())
        .assert()
        .success();

    write_executable_script(&tool, "#!/bin/sh\necho tampered\nexit 0\n");

    cmdguard()
        .args(["run", "-c"])
        .arg(&config_path)
        .arg("-d")
        .arg(hash_dir.path())
        .arg("-r")
        .arg("run-002")
        .assert()
        .code(3);
}

/// Scenario 3: a self-referential `env` cycle fails Load with exit 2,
/// before any command runs.
#[test]
fn env_cycle_fails_load_with_validation_exit_code() {
    let workdir = TempDir::new().unwrap();
    let config_path = workdir.path().join("config.toml");
    std::fs::write(
        &config_path,
        r#"
[global]
env = ["A=${B}", "B=${A}"]

[[groups]]
name = "g"

[[groups.commands]]
name = "noop"
cmd = "/bin/true"
"#,
    )
    .unwrap();

    let hash_dir = prepare_hash_dir();
    cmdguard()
        .args(["run", "-c"])
        .arg(&config_path)
        .arg("-d")
        .arg(hash_dir.path())
        .arg("-r")
        .arg("run-003")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("circular").or(predicate::str::contains("Circular")));
}

/// Scenario 4: a group-level allowlist replaces rather than extends the
/// global one, so a reference the group didn't re-list is rejected.
#[test]
fn group_allowlist_overrides_global_allowlist() {
    let workdir = TempDir::new().unwrap();
    let config_path = workdir.path().join("config.toml");
    std::fs::write(
        &config_path,
        r#"
[global]
env_allowlist = ["HOME"]

[[groups]]
name = "g"
env_allowlist = ["PORT"]

[[groups.commands]]
name = "echo-home"
cmd = "/bin/echo"
args = ["--home", "${HOME}"]
"#,
    )
    .unwrap();

    let hash_dir = prepare_hash_dir();
    cmdguard()
        .args(["run", "-c"])
        .arg(&config_path)
        .arg("-d")
        .arg(hash_dir.path())
        .arg("-r")
        .arg("run-004")
        .assert()
        .code(2);
}

#[test]
fn dry_run_prints_plan_without_spawning_children() {
    let workdir = TempDir::new().unwrap();
    let marker = workdir.path().join("never-created");
    let config_path = workdir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[[groups]]
name = "g"

[[groups.commands]]
name = "touch-marker"
cmd = "/usr/bin/touch"
args = ["{marker}"]
"#,
            marker = marker.display()
        ),
    )
    .unwrap();

    let hash_dir = prepare_hash_dir();
    cmdguard()
        .args(["record", "-c"])
        .arg(&config_path)
        .arg("-o")
        .arg(hash_dir.path())
        .assert()
        .success();

    cmdguard()
        .args(["run", "-c"])
        .arg(&config_path)
        .arg("-d")
        .arg(hash_dir.path())
        .arg("-r")
        .arg("run-005")
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("resolved plan"));

    assert!(!marker.exists());
}

#[test]
fn verify_reports_clean_config_as_success() {
    let workdir = TempDir::new().unwrap();
    let config_path = workdir.path().join("config.toml");
    std::fs::write(
        &config_path,
        r#"
[[groups]]
name = "g"

[[groups.commands]]
name = "noop"
cmd = "/bin/true"
"#,
    )
    .unwrap();

    let hash_dir = prepare_hash_dir();
    cmdguard()
        .args(["record", "-c"])
        .arg(&config_path)
        .arg("-o")
        .arg(hash_dir.path())
        .assert()
        .success();

    cmdguard()
        .args(["verify", "-c"])
        .arg(&config_path)
        .arg("-d")
        .arg(hash_dir.path())
        .assert()
        .success();
}

#[test]
fn record_without_force_refuses_to_overwrite_existing_entry() {
    let workdir = TempDir::new().unwrap();
    let config_path = workdir.path().join("config.toml");
    std::fs::write(
        &config_path,
        r#"
[[groups]]
name = "g"

[[groups.commands]]
name = "noop"
cmd = "/bin/true"
"#,
    )
    .unwrap();

    let hash_dir = prepare_hash_dir();
    cmdguard()
        .args(["record", "-c"])
        .arg(&config_path)
        .arg("-o")
        .arg(hash_dir.path())
        .assert()
        .success();

    cmdguard()
        .args(["record", "-c"])
        .arg(&config_path)
        .arg("-o")
        .arg(hash_dir.path())
        .assert()
        .code(3);

    cmdguard()
        .args(["record", "-c"])
        .arg(&config_path)
        .arg("-o")
        .arg(hash_dir.path())
        .arg("--force")
        .assert()
        .success();
}

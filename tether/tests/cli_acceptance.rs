use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("tether/tether.db")
    }

    fn write_config(&self, contents: &str) {
        let dir = self.xdg_config.join("tether");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(dir.join("config.toml"), contents).expect("failed to write config");
    }
}

fn run(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("tether"));

    Command::new(bin_path)
        .args(args)
        .current_dir(&env.home)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute tether: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "tether {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn run_ok(env: &CliTestEnv, args: &[&str]) -> String {
    let output = run(env, args);
    assert_success(args, &output);
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn register(env: &CliTestEnv, project: &str) -> String {
    run_ok(env, &["register", "--project", project])
        .trim()
        .to_string()
}

#[test]
fn register_creates_database_and_prints_id() {
    let env = CliTestEnv::new();

    let id = register(&env, "Odin App");
    assert!(id.starts_with("odin-app-PS-"), "unexpected id: {id}");
    assert!(env.db_path().exists());

    let listed = run_ok(&env, &["list"]);
    assert!(listed.contains(&id));
    assert!(listed.contains("active"));
}

#[test]
fn heartbeat_rejects_out_of_range_context() {
    let env = CliTestEnv::new();
    let id = register(&env, "odin");

    let output = run(&env, &["heartbeat", &id, "--context", "140"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("context_percent"), "stderr was:\n{stderr}");

    let ok = run_ok(&env, &["heartbeat", &id, "--context", "45", "--task", "T-7"]);
    assert!(ok.starts_with("ok"));

    let footer = run_ok(&env, &["footer", &id]);
    assert!(footer.contains("task T-7"));
    assert!(footer.contains("ctx 45%"));
}

#[test]
fn detached_heartbeat_failure_is_reported_not_fatal() {
    let env = CliTestEnv::new();

    let output = run(&env, &["heartbeat", "ghost-PS-000000", "--context", "10", "--detached"]);
    assert_success(&["heartbeat", "--detached"], &output);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("background heartbeat failed"),
        "stderr was:\n{stderr}"
    );
}

#[test]
fn emit_and_query_events_in_sequence() {
    let env = CliTestEnv::new();
    let id = register(&env, "odin");

    let first = run_ok(
        &env,
        &["emit", &id, "task_started", "--data", r#"{"name":"wire auth","epic_id":"epic-003"}"#],
    );
    assert!(first.trim().ends_with("#1"), "got {first}");
    let second = run_ok(&env, &["emit", &id, "note_added", "--data", r#"{"text":"v2 tokens"}"#]);
    assert!(second.trim().ends_with("#2"), "got {second}");

    let bad = run(&env, &["emit", &id, "made_up_event"]);
    assert!(!bad.status.success());

    let events = run_ok(&env, &["events", &id]);
    assert!(events.contains("task_started"));
    assert!(events.contains("2 of 2 event(s)"));

    let replay = run_ok(&env, &["replay", &id]);
    assert!(replay.contains("Task: wire auth"));
}

#[test]
fn checkpoint_round_trip_shows_brief() {
    let env = CliTestEnv::new();
    let id = register(&env, "odin");

    let created = run_ok(
        &env,
        &[
            "checkpoint",
            "create",
            &id,
            "--type",
            "task_completion",
            "--task",
            "wire auth",
            "--epic",
            "epic-003",
            "--pending",
            "add refresh tokens",
        ],
    );
    let checkpoint_id = created
        .split_whitespace()
        .next()
        .expect("checkpoint id in output")
        .to_string();

    let brief = run_ok(&env, &["checkpoint", "show", &checkpoint_id]);
    assert!(brief.contains("RECOVERY BRIEF"));
    assert!(brief.contains("epic-003"));
    assert!(brief.contains("Start the next pending task: add refresh tokens."));

    let listed = run_ok(&env, &["checkpoint", "list", &id]);
    assert!(listed.contains(&checkpoint_id));
    assert!(listed.contains("1 of 1 checkpoint(s)"));
}

#[test]
fn resume_refuses_active_and_reports_missing() {
    let env = CliTestEnv::new();
    let id = register(&env, "odin");

    let active = run(&env, &["resume", &id]);
    assert!(!active.status.success());
    let stderr = String::from_utf8_lossy(&active.stderr);
    assert!(
        stderr.contains("cannot resume an active instance"),
        "stderr was:\n{stderr}"
    );

    let missing = run_ok(&env, &["resume", "valhalla"]);
    assert!(missing.contains("No instance found for hint 'valhalla'"));
}

#[test]
fn resume_stale_instance_with_short_threshold() {
    let env = CliTestEnv::new();
    // Zero is rejected by validation, so use the smallest positive threshold
    env.write_config("[registry]\nstale_after_secs = 1\n");
    let id = register(&env, "odin");
    run_ok(&env, &["emit", &id, "task_started", "--data", r#"{"name":"wire auth"}"#]);

    std::thread::sleep(std::time::Duration::from_millis(2100));

    let brief = run_ok(&env, &["resume", "odin"]);
    assert!(brief.contains(&format!("Resuming {id}")), "got:\n{brief}");
    assert!(brief.contains("Source: events"));
    assert!(brief.contains("wire auth"));
}

#[test]
fn close_is_one_way() {
    let env = CliTestEnv::new();
    let id = register(&env, "odin");

    let closed = run_ok(&env, &["close", &id]);
    assert!(closed.contains("closed"));

    let again = run(&env, &["close", &id]);
    assert!(!again.status.success());

    let show = run_ok(&env, &["show", &id]);
    assert!(show.contains("Status:     closed"));
}

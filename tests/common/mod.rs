#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use filetime::{FileTime, set_file_mtime};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_keepn") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "keepn.exe" } else { "keepn" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve keepn binary path for integration test"),
    }
}

/// A `keepn` command isolated from the caller's home directory and `KEEPN_*`
/// environment.
pub fn keepn_command(home: &Path, envs: &[(&str, &str)]) -> Command {
    let mut cmd = Command::new(resolve_bin_path());
    for (key, _) in std::env::vars() {
        if key.starts_with("KEEPN_") {
            cmd.env_remove(key);
        }
    }
    cmd.env("HOME", home).env("RUST_BACKTRACE", "1");
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

pub fn run_cli_case_with_env(case_name: &str, args: &[&str], envs: &[(&str, &str)]) -> CmdResult {
    let home = tempfile::tempdir().expect("create isolated HOME");
    let output = keepn_command(home.path(), envs)
        .args(args)
        .output()
        .expect("execute keepn command");
    record(case_name, args, output.status, &output.stdout, &output.stderr)
}

/// Persist a transcript under the temp dir and bundle the result.
pub fn record(
    case_name: &str,
    args: &[&str],
    status: ExitStatus,
    stdout: &[u8],
    stderr: &[u8],
) -> CmdResult {
    let root = std::env::temp_dir().join("keepn-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");
    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));

    let stdout = String::from_utf8_lossy(stdout).to_string();
    let stderr = String::from_utf8_lossy(stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={status}\n"));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status,
        stdout,
        stderr,
        log_path,
    }
}

/// Start the daemon in the background with piped output.
pub fn spawn_daemon(home: &Path, args: &[&str]) -> Child {
    keepn_command(home, &[])
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn keepn daemon")
}

/// Create `name` in `dir` with a fixed modification time (unix seconds).
pub fn touch(dir: &Path, name: &str, mtime: i64) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, name).expect("write fixture file");
    set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).expect("set fixture mtime");
    path
}

/// Sorted entry names of `dir`.
pub fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read fixture dir")
        .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Poll `check` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn shell(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_jobsh"));
    cmd.current_dir(dir)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

fn spawn_shell(dir: &Path) -> Child {
    shell(dir).spawn().expect("failed to start jobsh")
}

fn run_script(dir: &Path, script: &str) -> Output {
    let mut child = spawn_shell(dir);
    child.stdin.take().unwrap().write_all(script.as_bytes()).unwrap();
    child.wait_with_output().unwrap()
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap()
}

/// Standard output with the `<cwd>$ ` prompts removed.
fn stdout_without_prompts(output: &Output, dir: &Path) -> String {
    let prompt = format!("{}$ ", canonical(dir).display());
    String::from_utf8_lossy(&output.stdout).replace(&prompt, "")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn read_trimmed(path: &Path) -> String {
    fs::read_to_string(path).unwrap().trim().to_string()
}

#[test]
fn pipeline_output_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(dir.path(), "echo hi | wc -l\n");

    assert!(output.status.success());
    assert_eq!(stdout_without_prompts(&output, dir.path()).trim(), "1");
    let err = stderr(&output);
    assert_eq!(err.matches("finished normally code=0").count(), 2, "{}", err);
}

#[test]
fn redirections_in_and_out() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(
        dir.path(),
        "echo hello > out.txt\ncat < out.txt | tr a-z A-Z\necho again > out.txt\n",
    );

    assert!(output.status.success());
    assert!(stdout_without_prompts(&output, dir.path()).contains("HELLO"));
    assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "again\n");
}

#[test]
fn cd_without_arguments_goes_home() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("home");
    fs::create_dir(&home).unwrap();

    let mut cmd = shell(dir.path());
    cmd.env("HOME", &home);
    let mut child = cmd.spawn().unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"cd\npwd > where.txt\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success());
    assert_eq!(
        read_trimmed(&home.join("where.txt")),
        canonical(&home).display().to_string()
    );
}

#[test]
fn cd_expands_its_argument() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("target_dir")).unwrap();

    let output = run_script(dir.path(), "cd target_*\npwd > ../where.txt\n");

    assert!(output.status.success());
    assert_eq!(
        read_trimmed(&dir.path().join("where.txt")),
        canonical(&dir.path().join("target_dir")).display().to_string()
    );
}

#[test]
fn cd_with_too_many_arguments_stays_put() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("a")).unwrap();

    let output = run_script(dir.path(), "cd a b\npwd > where.txt\n");

    assert!(stderr(&output).contains("cd : too many arguments"));
    assert_eq!(
        read_trimmed(&dir.path().join("where.txt")),
        canonical(dir.path()).display().to_string()
    );
}

#[test]
fn builtin_inside_pipeline_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(dir.path(), "cd / | cat\npwd > where.txt\n");

    let err = stderr(&output);
    assert!(err.contains("jobsh: cd: builtin cannot be used in a pipeline"), "{}", err);
    // Nothing was forked for the rejected line: only pwd reports.
    assert_eq!(err.matches("finished normally").count(), 1, "{}", err);
    assert_eq!(
        read_trimmed(&dir.path().join("where.txt")),
        canonical(dir.path()).display().to_string()
    );
}

#[test]
fn exit_returns_zero_and_abandons_background_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(dir.path(), "sleep 1 &\nexit\necho never\n");

    assert_eq!(output.status.code(), Some(0));
    assert!(!stdout_without_prompts(&output, dir.path()).contains("never"));
    assert!(!stderr(&output).contains("Process"));
}

#[test]
fn end_of_input_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(dir.path(), "");
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn background_job_is_reported_without_new_input() {
    let dir = tempfile::tempdir().unwrap();
    let mut child = spawn_shell(dir.path());
    let mut stdin = child.stdin.take().unwrap();

    let started = Instant::now();
    stdin.write_all(b"sleep 0.2 &\n").unwrap();
    stdin.flush().unwrap();
    thread::sleep(Duration::from_millis(1500));
    stdin.write_all(b"exit\n").unwrap();
    drop(stdin);

    let output = child.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    let err = stderr(&output);
    assert_eq!(err.matches("finished normally code=0").count(), 1, "{}", err);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn failures_are_reported_per_process() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(
        dir.path(),
        "jobsh-no-such-command\nsh -c 'kill -9 $$'\ncat < missing.txt\n",
    );

    assert!(output.status.success());
    let err = stderr(&output);
    assert!(err.contains("jobsh: jobsh-no-such-command: command not found"), "{}", err);
    assert!(err.contains("finished normally code=127"), "{}", err);
    assert!(err.contains("killed by signal : 9"), "{}", err);
    assert!(err.contains("jobsh: missing.txt: No such file or directory"), "{}", err);
    assert!(err.contains("finished normally code=1"), "{}", err);
}

#[test]
fn malformed_line_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(dir.path(), "| wc\necho ok\n");

    assert!(output.status.success());
    assert!(stderr(&output).contains("syntax error"));
    assert_eq!(stdout_without_prompts(&output, dir.path()), "ok\n");
}

#[cfg(target_os = "linux")]
#[test]
fn pipelines_do_not_leak_descriptors() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(
        dir.path(),
        "sh -c 'ls /proc/$PPID/fd' > shell_before.txt\n\
         ls /proc/self/fd > single.txt\n\
         ls /proc/self/fd | cat | cat > piped.txt\n\
         sh -c 'ls /proc/$PPID/fd' > shell_after.txt\n",
    );
    assert!(output.status.success());

    let count = |name: &str| fs::read_to_string(dir.path().join(name)).unwrap().lines().count();
    assert_eq!(count("single.txt"), count("piped.txt"));
    assert_eq!(count("shell_before.txt"), count("shell_after.txt"));
}

#[test]
fn invalid_utf8_line_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut child = spawn_shell(dir.path());
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"echo caf\xe9 > bad.txt\necho ok\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success());
    assert!(stderr(&output).contains("jobsh: input is not valid UTF-8"));
    assert!(!dir.path().join("bad.txt").exists());
    assert_eq!(stdout_without_prompts(&output, dir.path()), "ok\n");
}

#[test]
fn producer_is_killed_when_reader_exits() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(dir.path(), "yes | head -n 1\n");

    assert!(output.status.success());
    assert_eq!(stdout_without_prompts(&output, dir.path()), "y\n");
    let err = stderr(&output);
    assert!(err.contains("killed by signal : 13"), "{}", err);
    assert!(err.contains("finished normally code=0"), "{}", err);
}

/// Parses the `SigIgn:` mask a process wrote from `/proc/self/status`.
#[cfg(target_os = "linux")]
fn ignored_mask(path: &Path) -> u64 {
    let text = read_trimmed(path);
    let hex = text.trim_start_matches("SigIgn:").trim();
    u64::from_str_radix(hex, 16).unwrap()
}

#[cfg(target_os = "linux")]
#[test]
fn interrupt_is_ignored_only_in_background_jobs() {
    const SIGINT_BIT: u64 = 1 << (2 - 1);
    const SIGPIPE_BIT: u64 = 1 << (13 - 1);

    let dir = tempfile::tempdir().unwrap();
    let mut child = spawn_shell(dir.path());
    let mut stdin = child.stdin.take().unwrap();
    stdin
        .write_all(b"grep SigIgn /proc/self/status > bg.txt &\ngrep SigIgn /proc/self/status > fg.txt\n")
        .unwrap();
    stdin.flush().unwrap();

    let bg = dir.path().join("bg.txt");
    let deadline = Instant::now() + Duration::from_secs(10);
    while fs::read_to_string(&bg).map(|s| !s.ends_with('\n')).unwrap_or(true) {
        assert!(Instant::now() < deadline, "background job never wrote its mask");
        thread::sleep(Duration::from_millis(20));
    }
    stdin.write_all(b"exit\n").unwrap();
    drop(stdin);
    assert!(child.wait_with_output().unwrap().status.success());

    let background = ignored_mask(&bg);
    let foreground = ignored_mask(&dir.path().join("fg.txt"));
    assert_ne!(background & SIGINT_BIT, 0, "{:x}", background);
    assert_eq!(foreground & SIGINT_BIT, 0, "{:x}", foreground);
    assert_eq!(background & SIGPIPE_BIT, 0, "{:x}", background);
    assert_eq!(foreground & SIGPIPE_BIT, 0, "{:x}", foreground);
}

//! The binary must exit on its own after a goodbye or Ctrl-C, even while
//! stdin is still open and a read on it is pending.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

const EXIT_LIMIT: Duration = Duration::from_secs(10);

fn spawn_jarvis(home: &tempfile::TempDir, args: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_jarvis"))
        .args(args)
        .env("HOME", home.path())
        .env("JARVIS_HISTORY_LOG", home.path().join("log.txt"))
        .env("VOICE_ENGINE", "text")
        .env("BOTNAME", "Jarvis")
        .env("JARVIS_USER", "Tony")
        // Nothing listens here, so any model call fails fast.
        .env("OLLAMA_URL", "http://127.0.0.1:1")
        .env_remove("VOSK_MODEL_PATH")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start jarvis")
}

/// Wait for the process to exit; kill it and fail if it hangs.
fn assert_exits(child: &mut Child) {
    match child.wait_timeout(EXIT_LIMIT).unwrap() {
        Some(status) => assert!(status.success(), "exited with {status}"),
        None => {
            child.kill().unwrap();
            child.wait().unwrap();
            panic!("jarvis was still running {EXIT_LIMIT:?} after it was told to stop");
        }
    }
}

fn goodbye_exits(args: &[&str]) {
    let home = tempfile::tempdir().unwrap();
    let mut child = spawn_jarvis(&home, args);

    // Keep the pipe open so stdin never reaches EOF.
    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(b"bye\n").unwrap();
    stdin.flush().unwrap();

    assert_exits(&mut child);
    let mut out = String::new();
    child.stdout.take().unwrap().read_to_string(&mut out).unwrap();
    assert!(out.contains("Jarvis: Bye bye Tony, see you later!"), "stdout: {out}");
    assert!(out.contains("Jarvis: System offline."), "stdout: {out}");
    drop(stdin);
}

#[test]
fn goodbye_in_queued_mode_ends_the_process() {
    goodbye_exits(&["--queue", "--workers", "2"]);
}

#[test]
fn goodbye_at_the_console_ends_the_process() {
    goodbye_exits(&["--text"]);
}

#[cfg(unix)]
#[test]
fn ctrl_c_ends_the_process_while_waiting_for_input() {
    let home = tempfile::tempdir().unwrap();
    let mut child = spawn_jarvis(&home, &["--text"]);
    let stdin = child.stdin.take().unwrap();
    let mut out = BufReader::new(child.stdout.take().unwrap());

    // The Ctrl-C handler is installed right after the greeting.
    let mut seen = String::new();
    while !seen.contains("How may I assist you?") {
        let mut line = String::new();
        if out.read_line(&mut line).unwrap() == 0 {
            panic!("jarvis exited before greeting: {seen}");
        }
        seen.push_str(&line);
    }
    std::thread::sleep(Duration::from_millis(300));

    let sent = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(sent.success());

    assert_exits(&mut child);
    let mut rest = String::new();
    out.read_to_string(&mut rest).unwrap();
    assert!(rest.contains("Jarvis: Proceeding to shutdown."), "stdout: {rest}");
    assert!(rest.contains("Jarvis: System offline."), "stdout: {rest}");
    drop(stdin);
}

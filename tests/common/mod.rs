use anyhow::Context;
use std::process::{Command, ExitStatus, Stdio};

// Set on the re-executed test binary, naming the one test that should misbehave
const CHILD_ENV: &str = "RECURSIVE_SHARED_MUTEX_DEATH_TEST";

pub fn is_child(test: &str) -> bool {
    std::env::var(CHILD_ENV).map_or(false, |v| v == test)
}

pub fn run_child(test: &str) -> anyhow::Result<ExitStatus> {
    let exe = std::env::current_exe().context("locating test binary")?;
    Command::new(exe)
        .args([test, "--exact", "--test-threads=1"])
        .env(CHILD_ENV, test)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .with_context(|| format!("spawning child for {test}"))
}

pub fn assert_aborted(status: ExitStatus) {
    assert!(!status.success(), "child exited cleanly: {status}");
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert!(
            status.signal().is_some(),
            "child was not killed by a signal: {status}"
        );
    }
}

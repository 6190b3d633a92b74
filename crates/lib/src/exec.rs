//! Run a command and capture its combined output. No shell is interposed;
//! the argument vector is passed to the OS as-is to avoid injection.

use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Exit code reported when a command cannot be started or its exit status
/// cannot be decoded.
pub const EXEC_FAILURE_CODE: i32 = 1;

/// Signal-terminated children report the shell convention of 128 + signal.
const SIGNAL_EXIT_BASE: i32 = 128;

const READ_CHUNK: usize = 8192;

/// Outcome of one command: combined stdout/stderr in emission order, and the
/// decoded exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub output: String,
    pub exit_code: i32,
}

/// Runs commands for the gateway. Object-safe so handlers hold
/// `Arc<dyn CommandRunner>` and tests can substitute a counting stub.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> RunOutcome;
}

/// Real runner: spawns child processes, optionally killing them after
/// `timeout`.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    pub timeout: Option<Duration>,
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> RunOutcome {
        run_command(program, args, self.timeout).await
    }
}

/// Spawn `program` with `args` (stdin closed, stdout/stderr piped) and wait
/// for it. Failure modes are encoded in the outcome, never raised:
/// - normal exit: the child's exit code;
/// - could not start: the error text as output, exit code 1;
/// - killed by signal N (including a timeout kill): 128 + N;
/// - anything else: 1.
pub async fn run_command(program: &str, args: &[String], timeout: Option<Duration>) -> RunOutcome {
    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return RunOutcome {
                output: format!("failed to start {}: {}", program, e),
                exit_code: EXEC_FAILURE_CODE,
            }
        }
    };

    let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return RunOutcome {
            output: format!("failed to capture output of {}", program),
            exit_code: EXEC_FAILURE_CODE,
        };
    };

    // Both pipes are read in one loop so the combined buffer keeps the order
    // the child emitted, as far as pipe buffering allows.
    let mut combined: Vec<u8> = Vec::new();
    let mut out_buf = [0u8; READ_CHUNK];
    let mut err_buf = [0u8; READ_CHUNK];
    let mut out_open = true;
    let mut err_open = true;
    let mut status: Option<ExitStatus> = None;
    let mut waiting = true;
    let mut timed_out = false;

    let deadline = async {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    while out_open || err_open || waiting {
        tokio::select! {
            _ = &mut deadline, if waiting && !timed_out => {
                timed_out = true;
                log::warn!("command timed out, killing: {}", program);
                let _ = child.start_kill();
            }
            res = child.wait(), if waiting => {
                waiting = false;
                match res {
                    Ok(s) => status = Some(s),
                    Err(e) => log::warn!("waiting for {} failed: {}", program, e),
                }
            }
            read = stdout.read(&mut out_buf), if out_open => match read {
                Ok(0) | Err(_) => out_open = false,
                Ok(n) => combined.extend_from_slice(&out_buf[..n]),
            },
            read = stderr.read(&mut err_buf), if err_open => match read {
                Ok(0) | Err(_) => err_open = false,
                Ok(n) => combined.extend_from_slice(&err_buf[..n]),
            },
        }
    }

    RunOutcome {
        output: String::from_utf8_lossy(&combined).into_owned(),
        exit_code: status.map_or(EXEC_FAILURE_CODE, decode_exit_status),
    }
}

/// Child exit status to gateway exit code: the real code when present, else
/// 128 + signal, else the fallback 1.
fn decode_exit_status(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(code) = status.code() {
        return code;
    }
    match status.signal() {
        Some(sig) => SIGNAL_EXIT_BASE + sig,
        None => EXEC_FAILURE_CODE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_zero() {
        let out = run_command("echo", &args(&["hello"]), None).await;
        assert_eq!(out.output, "hello\n");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn surfaces_child_exit_code() {
        let out = run_command("sh", &args(&["-c", "exit 3"]), None).await;
        assert_eq!(out.output, "");
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn combines_stdout_and_stderr() {
        let out = run_command("sh", &args(&["-c", "echo out; echo err 1>&2"]), None).await;
        assert!(out.output.contains("out\n"));
        assert!(out.output.contains("err\n"));
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn spawn_failure_is_code_one_with_diagnostic() {
        let out = run_command("/nonexistent/not-a-real-binary", &[], None).await;
        assert_eq!(out.exit_code, EXEC_FAILURE_CODE);
        assert!(!out.output.is_empty());
    }

    #[tokio::test]
    async fn signal_death_maps_to_128_plus_signal() {
        let out = run_command("sh", &args(&["-c", "kill -9 $$"]), None).await;
        assert_eq!(out.exit_code, 128 + 9);
    }

    #[tokio::test]
    async fn timeout_kills_long_command() {
        let timeout = Some(Duration::from_millis(200));
        let out = run_command("sleep", &args(&["5"]), timeout).await;
        assert_eq!(out.exit_code, 128 + 9);
    }

    #[tokio::test]
    async fn no_shell_interpretation_of_arguments() {
        let out = run_command("echo", &args(&["hello; rm -rf /"]), None).await;
        assert_eq!(out.output, "hello; rm -rf /\n");
        assert_eq!(out.exit_code, 0);
    }
}

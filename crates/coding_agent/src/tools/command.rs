//! `run_command`: child process in its own group, bounded by timeout and cancellation.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use agent_provider::{is_cancelled, CancelSignal};
use wait_timeout::ChildExt;

use super::output::format_process_output;
use crate::error::ToolError;

const WAIT_SLICE: Duration = Duration::from_millis(25);
/// How long output pipes may stay open after the group was killed.
/// Processes that left the group can hold them indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

enum Ending {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Runs `spec` in `cwd`. Without args the command line goes through `sh -c`.
pub fn run_command(cwd: &Path, spec: &CommandSpec, cancel: &CancelSignal) -> Result<String, ToolError> {
    let mut builder = if spec.args.is_empty() {
        let mut builder = Command::new("sh");
        builder.arg("-c").arg(&spec.command);
        builder
    } else {
        let mut builder = Command::new(&spec.command);
        builder.args(&spec.args);
        builder
    };
    builder
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        builder.process_group(0);
    }

    let mut child = builder
        .spawn()
        .map_err(|error| ToolError::Io(format!("failed to launch '{}': {error}", spec.command)))?;
    tracing::debug!(pid = child.id(), command = %spec.command, "command started");

    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let ending = wait_for_exit(&mut child, spec.timeout, cancel);
    let ending = match ending {
        Ok(ending) => ending,
        Err(error) => {
            kill_process_group(&mut child);
            return Err(ToolError::Io(format!("failed waiting for command: {error}")));
        }
    };

    // Background jobs share the group and keep the pipes open, so the group
    // goes down even when the leader exited on its own.
    kill_process_group(&mut child);

    let drain_deadline = Instant::now() + DRAIN_GRACE;
    let stdout = drain_reader(stdout_reader, drain_deadline, cancel);
    let stderr = drain_reader(stderr_reader, drain_deadline, cancel);

    match ending {
        Ending::Exited(status) => {
            let output = format_process_output(&format_exit_status(status), &stdout, &stderr);
            if status.success() {
                Ok(output)
            } else {
                Err(ToolError::NonZeroExit {
                    status: format_exit_status(status),
                    output,
                })
            }
        }
        Ending::TimedOut => {
            let seconds = spec.timeout.as_secs();
            tracing::warn!(command = %spec.command, seconds, "command timed out");
            Err(ToolError::Timeout {
                seconds,
                output: format_process_output(&format!("timeout after {seconds}s"), &stdout, &stderr),
            })
        }
        Ending::Cancelled => Err(ToolError::Cancelled {
            output: format_process_output("cancelled", &stdout, &stderr),
        }),
    }
}

fn wait_for_exit(
    child: &mut Child,
    timeout: Duration,
    cancel: &CancelSignal,
) -> std::io::Result<Ending> {
    let deadline = Instant::now() + timeout;
    loop {
        if is_cancelled(cancel) {
            return Ok(Ending::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(Ending::TimedOut);
        }
        let slice = WAIT_SLICE.min(deadline - now);
        if let Some(status) = child.wait_timeout(slice)? {
            return Ok(Ending::Exited(status));
        }
    }
}

/// Kills every process in the child's group, then reaps the child. Safe to
/// call after the leader was already reaped.
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            unsafe {
                libc::killpg(pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader(pipe: Option<impl Read + Send + 'static>) -> Option<Receiver<Vec<u8>>> {
    let mut pipe = pipe?;
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name("run-command-output".to_string())
        .spawn(move || {
            let mut chunk = [0_u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(read) => {
                        if sender.send(chunk[..read].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        })
        .ok()?;
    Some(receiver)
}

/// Collects chunks until the pipe closes, `deadline` passes, or the turn is
/// cancelled. Whatever arrived by then is returned.
fn drain_reader(reader: Option<Receiver<Vec<u8>>>, deadline: Instant, cancel: &CancelSignal) -> Vec<u8> {
    let Some(reader) = reader else {
        return Vec::new();
    };
    let mut bytes = Vec::new();
    loop {
        match reader.recv_timeout(WAIT_SLICE) {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => return bytes,
            Err(RecvTimeoutError::Timeout) => {
                if Instant::now() >= deadline || is_cancelled(cancel) {
                    tracing::debug!("command output still open after the group was killed");
                    return bytes;
                }
            }
        }
    }
}

fn format_exit_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit_code={code}"),
        None => "exit_code=terminated_by_signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use agent_provider::new_cancel_signal;
    use tempfile::tempdir;

    use super::*;

    fn spec(command: &str, timeout_ms: u64) -> CommandSpec {
        CommandSpec {
            command: command.to_string(),
            args: Vec::new(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[test]
    fn shell_command_captures_both_streams() {
        let workspace = tempdir().expect("temp workspace");
        let output = run_command(
            workspace.path(),
            &spec("printf out; printf err >&2", 5_000),
            &new_cancel_signal(),
        )
        .expect("command succeeds");
        assert_eq!(output, "status: exit_code=0\nstdout:\nout\nstderr:\nerr");
    }

    #[test]
    fn args_bypass_the_shell() {
        let workspace = tempdir().expect("temp workspace");
        let spec = CommandSpec {
            command: "echo".to_string(),
            args: vec!["$HOME".to_string()],
            timeout: Duration::from_secs(5),
        };
        let output = run_command(workspace.path(), &spec, &new_cancel_signal()).expect("echo runs");
        assert!(output.contains("stdout:\n$HOME\n"), "{output}");
    }

    #[test]
    fn nonzero_exit_is_an_error_with_output() {
        let workspace = tempdir().expect("temp workspace");
        let error = run_command(workspace.path(), &spec("echo nope; exit 3", 5_000), &new_cancel_signal())
            .expect_err("exit 3 fails");
        match error {
            ToolError::NonZeroExit { status, output } => {
                assert_eq!(status, "exit_code=3");
                assert!(output.contains("nope"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn large_output_does_not_deadlock() {
        let workspace = tempdir().expect("temp workspace");
        let output = run_command(
            workspace.path(),
            &spec("head -c 300000 /dev/zero | tr '\\0' 'a'", 10_000),
            &new_cancel_signal(),
        )
        .expect("large output");
        assert!(output.len() > 300_000);
    }

    #[test]
    fn cancellation_kills_the_group_early() {
        let workspace = tempdir().expect("temp workspace");
        let cancel = new_cancel_signal();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.store(true, std::sync::atomic::Ordering::Release);
        });

        let started = Instant::now();
        let error = run_command(workspace.path(), &spec("sleep 10", 20_000), &cancel)
            .expect_err("cancelled");
        canceller.join().expect("canceller thread");

        assert!(matches!(error, ToolError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn background_jobs_do_not_hold_the_command_open() {
        let workspace = tempdir().expect("temp workspace");

        let started = Instant::now();
        let output = run_command(
            workspace.path(),
            &spec("sleep 8 & echo hi", 1_000),
            &new_cancel_signal(),
        )
        .expect("leader exits cleanly");

        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
        assert!(output.contains("stdout:\nhi"), "{output}");
    }
}

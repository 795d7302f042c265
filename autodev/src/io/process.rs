//! Child process runner with timeout, bounded output, line streaming, and a
//! heartbeat thread.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Notice appended to logs when stdout was cut at the output limit.
    pub fn truncated_notice(&self, label: &str) -> String {
        let mut notice = String::new();
        if self.stdout_truncated > 0 {
            notice.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        if self.stderr_truncated > 0 {
            notice.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        notice
    }
}

/// Knobs for [`run_command_streaming`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Name used in log lines.
    pub label: String,
    pub timeout: Duration,
    /// Bytes of stdout/stderr kept in memory; the rest is drained and counted.
    pub output_limit_bytes: usize,
    /// Emit each stdout line as a `debug` event while the child runs.
    pub stream_lines: bool,
    /// Log a progress line at this interval while the child runs.
    pub heartbeat: Option<Duration>,
}

/// Run a command with a timeout, reading stdout line by line as it arrives.
///
/// Output is read concurrently while the child runs so pipes never fill.
/// A heartbeat thread, when configured, logs elapsed time until the child
/// exits. Neither thread affects the result beyond logging.
#[instrument(skip_all, fields(label = %opts.label, timeout_secs = opts.timeout.as_secs()))]
pub fn run_command_streaming(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    opts: &RunOptions,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
        // Dropping closes the pipe so the child sees EOF.
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = opts.output_limit_bytes;
    let stream_lines = opts.stream_lines;
    let label = opts.label.clone();
    let stdout_handle =
        thread::spawn(move || read_lines_limited(stdout, limit, stream_lines.then_some(label)));
    let stderr_handle = thread::spawn(move || read_lines_limited(stderr, limit, None));

    let heartbeat = opts
        .heartbeat
        .map(|interval| spawn_heartbeat(opts.label.clone(), interval, started));

    let mut timed_out = false;
    let wait_result = child.wait_timeout(opts.timeout).context("wait for command");
    let status = match wait_result {
        Ok(Some(status)) => status,
        Ok(None) => {
            warn!(
                timeout_secs = opts.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
        Err(err) => {
            stop_heartbeat(heartbeat);
            return Err(err);
        }
    };
    stop_heartbeat(heartbeat);

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    let elapsed = started.elapsed();
    debug!(exit_code = ?status.code(), timed_out, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        elapsed,
    })
}

struct Heartbeat {
    stop: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

fn spawn_heartbeat(label: String, interval: Duration, started: Instant) -> Heartbeat {
    let (stop, rx) = mpsc::channel::<()>();
    let handle = thread::spawn(move || {
        loop {
            match rx.recv_timeout(interval) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    info!(
                        label = %label,
                        elapsed_secs = started.elapsed().as_secs(),
                        "still running"
                    );
                }
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });
    Heartbeat { stop, handle }
}

fn stop_heartbeat(heartbeat: Option<Heartbeat>) {
    if let Some(heartbeat) = heartbeat {
        let _ = heartbeat.stop.send(());
        if heartbeat.handle.join().is_err() {
            warn!("heartbeat thread panicked");
        }
    }
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line with a size limit, optionally logging each line.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    echo_label: Option<String>,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(label) = &echo_label {
            let text = String::from_utf8_lossy(&line);
            debug!(label = %label, line = %text.trim_end(), "child output");
        }

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((collected, truncated))
}

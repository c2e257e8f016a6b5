//! Child processes for command-backed text providers.
//!
//! The child receives its whole input on stdin and answers on stdout. Input is
//! fed from a separate thread so the deadline holds even when the child never
//! reads, and a child that exits before draining stdin is not an error.

use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// What a finished (or killed) provider command produced.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    /// Bytes of stdout discarded beyond the output limit.
    pub stdout_dropped: u64,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Last non-empty stderr line, for error messages.
    pub fn stderr_tail(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
    }
}

type Captured = JoinHandle<io::Result<(Vec<u8>, u64)>>;

/// Run `cmd` with `input` on stdin, killing it once `timeout` elapses.
///
/// At most `output_limit_bytes` of stdout and of stderr are kept; the rest is
/// drained and counted. The child is always reaped, including on error.
#[instrument(skip_all, fields(input_len = input.len(), timeout_ms = timeout.as_millis() as u64))]
pub fn run_with_input(
    mut cmd: Command,
    input: Vec<u8>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().context("spawn provider command")?;
    debug!(pid = child.id(), "provider command started");

    let result = supervise(&mut child, input, timeout, output_limit_bytes);
    if result.is_err() {
        reap(&mut child);
    }
    result
}

fn supervise(
    child: &mut Child,
    input: Vec<u8>,
    timeout: Duration,
    limit: usize,
) -> Result<CommandOutput> {
    let stdin = child.stdin.take().ok_or_else(|| anyhow!("stdin was not piped"))?;
    let stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr was not piped"))?;

    let writer = thread::spawn(move || feed_stdin(stdin, &input));
    let stdout_reader: Captured = thread::spawn(move || read_capped(stdout, limit));
    let stderr_reader: Captured = thread::spawn(move || read_capped(stderr, limit));

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for provider command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_ms = timeout.as_millis() as u64, "provider command timed out, killing");
            child.kill().context("kill provider command")?;
            (child.wait().context("reap provider command")?, true)
        }
    };

    writer
        .join()
        .map_err(|_| anyhow!("stdin writer panicked"))?
        .context("write provider stdin")?;
    let (stdout, stdout_dropped) = collect(stdout_reader).context("read provider stdout")?;
    let (stderr, _) = collect(stderr_reader).context("read provider stderr")?;
    if stdout_dropped > 0 {
        warn!(stdout_dropped, "provider stdout exceeded the output limit");
    }

    Ok(CommandOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        stdout_dropped,
        timed_out,
    })
}

/// Write all of `input`, then close stdin. A child that stops reading early
/// closes the pipe, which ends the write without failing the run.
fn feed_stdin(mut stdin: ChildStdin, input: &[u8]) -> io::Result<()> {
    match stdin.write_all(input) {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
            debug!("provider command closed stdin before reading all input");
            Ok(())
        }
        other => other,
    }
}

fn read_capped<R: Read>(mut reader: R, limit: usize) -> io::Result<(Vec<u8>, u64)> {
    let mut kept = Vec::new();
    (&mut reader).take(limit as u64).read_to_end(&mut kept)?;
    let dropped = io::copy(&mut reader, &mut io::sink())?;
    Ok((kept, dropped))
}

fn collect(handle: Captured) -> Result<(Vec<u8>, u64)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader panicked"))?
        .map_err(Into::into)
}

fn reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(error = %err, "kill after failure");
    }
    if let Err(err) = child.wait() {
        warn!(error = %err, "could not reap provider command");
    }
}

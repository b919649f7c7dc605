//! Runs one ledger CLI invocation under a deadline.
//!
//! Both pipes are drained on their own threads while the child runs, so a
//! chatty CLI never blocks on a full pipe. Only the first `output_limit_bytes`
//! of each stream are kept.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes kept from one output stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Bytes read past the limit and discarded.
    pub dropped: u64,
}

impl Captured {
    fn drain<R: Read>(mut reader: R, limit: usize) -> io::Result<Self> {
        let mut bytes = Vec::new();
        (&mut reader).take(limit as u64).read_to_end(&mut bytes)?;
        let dropped = io::copy(&mut reader, &mut io::sink())?;
        Ok(Self { bytes, dropped })
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    /// The deadline passed and the child was killed.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success() && !self.timed_out
    }

    /// Stdout without trailing whitespace: the call's payload.
    pub fn stdout_text(&self) -> String {
        self.stdout.text().trim_end().to_string()
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.text().trim().to_string()
    }
}

type Reader = JoinHandle<io::Result<Captured>>;

fn spawn_reader<R: Read + Send + 'static>(stream: Option<R>, limit: usize) -> Result<Reader> {
    let stream = stream.ok_or_else(|| anyhow!("child stream not piped"))?;
    Ok(thread::spawn(move || Captured::drain(stream, limit)))
}

fn collect(reader: Reader, name: &str) -> Result<Captured> {
    reader
        .join()
        .map_err(|_| anyhow!("{name} reader panicked"))?
        .with_context(|| format!("read {name}"))
}

fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for ledger CLI")? {
        return Ok((status, false));
    }
    warn!(timeout_ms = timeout.as_millis() as u64, "ledger CLI timed out; killing");
    child.kill().context("kill ledger CLI")?;
    let status = child.wait().context("reap ledger CLI")?;
    Ok((status, true))
}

/// Spawn `cmd`, wait at most `timeout`, and capture up to
/// `output_limit_bytes` of stdout and of stderr.
#[instrument(skip_all, fields(program = ?cmd.get_program()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("spawn ledger CLI")?;

    let stdout = spawn_reader(child.stdout.take(), output_limit_bytes)?;
    let stderr = spawn_reader(child.stderr.take(), output_limit_bytes)?;
    let (status, timed_out) = wait_or_kill(&mut child, timeout)?;

    let output = CommandOutput {
        status,
        stdout: collect(stdout, "stdout")?,
        stderr: collect(stderr, "stderr")?,
        timed_out,
    };
    if output.stdout.dropped > 0 || output.stderr.dropped > 0 {
        warn!(
            stdout_dropped = output.stdout.dropped,
            stderr_dropped = output.stderr.dropped,
            "ledger CLI output over limit"
        );
    }
    debug!(code = ?output.status.code(), timed_out, "ledger CLI exited");
    Ok(output)
}

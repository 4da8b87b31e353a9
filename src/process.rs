use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::EcoError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// Stderr if the process wrote any, otherwise stdout.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Runs `command` to completion with piped output. The whole call, including
/// collecting output, is bounded by `timeout`: the child is killed when it
/// overruns, and a descendant that keeps the pipes open past the deadline is
/// abandoned.
pub fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> Result<ProcessOutput, EcoError> {
    let deadline = Instant::now() + timeout;
    let program = command.get_program().to_string_lossy().to_string();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| EcoError::Subprocess(format!("spawn {program}: {err}")))?;

    let (tx, rx) = mpsc::channel();
    drain(Stream::Stdout, child.stdout.take(), tx.clone());
    drain(Stream::Stderr, child.stderr.take(), tx);

    let Some(status) = wait_until(&mut child, deadline)? else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(EcoError::SubprocessTimeout(timeout.as_secs()));
    };

    let mut stdout = String::new();
    let mut stderr = String::new();
    loop {
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(POLL_INTERVAL);
        match rx.recv_timeout(remaining) {
            Ok((Stream::Stdout, text)) => stdout = text,
            Ok((Stream::Stderr, text)) => stderr = text,
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    program = %program,
                    "process exited but its output pipes are still held open"
                );
                return Err(EcoError::SubprocessTimeout(timeout.as_secs()));
            }
        }
    }

    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
    })
}

fn wait_until(child: &mut Child, deadline: Instant) -> Result<Option<ExitStatus>, EcoError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) if Instant::now() >= deadline => return Ok(None),
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => return Err(EcoError::Subprocess(err.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn drain<R>(stream: Stream, pipe: Option<R>, tx: Sender<(Stream, String)>)
where
    R: Read + Send + 'static,
{
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send((stream, String::from_utf8_lossy(&buf).to_string()));
        });
    }
}

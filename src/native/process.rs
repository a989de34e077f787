//! Supervised child processes.
//!
//! A [`LiveProcess`] is the exclusive handle to one running child. Output is
//! pumped into shared append-only buffers as it arrives, and a supervisor
//! task races the child's exit against a deadline and kill requests. The
//! deadline can be pushed back while the process runs (interactive input).

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::constants::{PUMP_DRAIN_GRACE, READ_CHUNK_BYTES, SIGNAL_EXIT_BASE};
use crate::core::domain::{ExitOutcome, ProcessCommand, StdinSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct StreamBuffer {
    bytes: Vec<u8>,
    truncated: bool,
}

#[derive(Debug, Default)]
struct Buffers {
    stdout: StreamBuffer,
    stderr: StreamBuffer,
}

/// Append-only stdout/stderr of one process, capped per stream.
#[derive(Clone, Debug)]
pub struct OutputBuffers {
    inner: Arc<Mutex<Buffers>>,
    limit: usize,
}

impl OutputBuffers {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Buffers::default())),
            limit,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buffers> {
        // A poisoned lock still holds consistent byte buffers.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, stream: Stream, chunk: &[u8]) {
        let mut buffers = self.lock();
        let buffer = match stream {
            Stream::Stdout => &mut buffers.stdout,
            Stream::Stderr => &mut buffers.stderr,
        };

        let room = self.limit.saturating_sub(buffer.bytes.len());
        if chunk.len() > room {
            buffer.truncated = true;
        }
        buffer.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    pub fn len(&self, stream: Stream) -> usize {
        let buffers = self.lock();
        match stream {
            Stream::Stdout => buffers.stdout.bytes.len(),
            Stream::Stderr => buffers.stderr.bytes.len(),
        }
    }

    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.lock().stdout.bytes).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.lock().stderr.bytes).into_owned()
    }

    /// Stdout bytes appended after `mark`. A mark inside a multi-byte
    /// character moves back to that character's first byte.
    pub fn stdout_since(&self, mark: usize) -> String {
        let buffers = self.lock();
        let bytes = &buffers.stdout.bytes;
        let mut start = mark.min(bytes.len());
        while start > 0 && start < bytes.len() && is_continuation(bytes[start]) {
            start -= 1;
        }
        String::from_utf8_lossy(&bytes[start..]).into_owned()
    }

    pub fn truncated(&self) -> bool {
        let buffers = self.lock();
        buffers.stdout.truncated || buffers.stderr.truncated
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0b1100_0000 == 0b1000_0000
}

/// Exclusive handle to a supervised child process.
///
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct LiveProcess {
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    output: OutputBuffers,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    deadline_tx: watch::Sender<Instant>,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
    started_at: Instant,
}

impl LiveProcess {
    #[tracing::instrument(skip(stdin))]
    pub fn spawn(
        command: &ProcessCommand,
        stdin: StdinSource,
        timeout: Duration,
        max_output_bytes: usize,
    ) -> std::io::Result<Self> {
        let stdin_stdio = match &stdin {
            StdinSource::Null => Stdio::null(),
            StdinSource::Piped => Stdio::piped(),
            StdinSource::File(path) => Stdio::from(std::fs::File::open(path)?),
        };

        // Own process group, so a kill also reaches grandchildren.
        let mut std_command = std::process::Command::new(&command.program);
        std_command
            .args(&command.args)
            .current_dir(&command.cwd)
            .stdin(stdin_stdio)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = Command::from(std_command).kill_on_drop(true).spawn()?;

        let started_at = Instant::now();
        let pid = child.id();
        let output = OutputBuffers::new(max_output_bytes);

        let stdout_pump = child
            .stdout
            .take()
            .map(|reader| pump(reader, output.clone(), Stream::Stdout));
        let stderr_pump = child
            .stderr
            .take()
            .map(|reader| pump(reader, output.clone(), Stream::Stderr));
        let child_stdin = child.stdin.take();

        let (kill_tx, kill_rx) = oneshot::channel();
        let (deadline_tx, deadline_rx) = watch::channel(started_at + timeout);
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(supervise(
            child,
            pid,
            kill_rx,
            deadline_rx,
            [stdout_pump, stderr_pump],
            exit_tx,
        ));

        tracing::debug!("Spawned process {:?}", pid);
        Ok(Self {
            stdin: tokio::sync::Mutex::new(child_stdin),
            output,
            kill_tx: Mutex::new(Some(kill_tx)),
            deadline_tx,
            exit_rx,
            started_at,
        })
    }

    pub fn output(&self) -> &OutputBuffers {
        &self.output
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Writes `input` followed by a newline.
    pub async fn write_line(&self, input: &str) -> std::io::Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin is closed")
        })?;

        stdin.write_all(input.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }

    /// Signals EOF to the child.
    pub async fn close_stdin(&self) {
        self.stdin.lock().await.take();
    }

    /// Moves the deadline to `timeout` from now.
    pub fn extend_deadline(&self, timeout: Duration) {
        self.deadline_tx.send_replace(Instant::now() + timeout);
    }

    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        *self.exit_rx.borrow()
    }

    /// Resolves once the child exited and its output pipes are drained.
    pub async fn wait(&self) -> ExitOutcome {
        let mut exit_rx = self.exit_rx.clone();
        match exit_rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).unwrap_or(ExitOutcome::Killed),
            Err(_) => ExitOutcome::Killed,
        }
    }

    /// Kills the process group. Safe on an already-dead process.
    pub async fn kill(&self) -> ExitOutcome {
        let kill_tx = self
            .kill_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(kill_tx) = kill_tx {
            let _ = kill_tx.send(());
        }
        self.wait().await
    }
}

fn pump<R>(mut reader: R, output: OutputBuffers, stream: Stream) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; READ_CHUNK_BYTES];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => output.append(stream, &buf[..n]),
                Err(e) => {
                    tracing::warn!("Failed to read {:?}: {}", stream, e);
                    break;
                }
            }
        }
    })
}

enum Event {
    Exited(std::io::Result<ExitStatus>),
    KillRequested,
    DeadlineReached,
    DeadlineMoved,
}

async fn supervise(
    mut child: Child,
    pid: Option<u32>,
    mut kill_rx: oneshot::Receiver<()>,
    mut deadline_rx: watch::Receiver<Instant>,
    pumps: [Option<JoinHandle<()>>; 2],
    exit_tx: watch::Sender<Option<ExitOutcome>>,
) {
    let outcome = loop {
        let deadline = *deadline_rx.borrow_and_update();

        // The kill channel and the deadline channel both close when the
        // owning LiveProcess is dropped; either way the child must die.
        let event = tokio::select! {
            status = child.wait() => Event::Exited(status),
            _ = &mut kill_rx => Event::KillRequested,
            _ = tokio::time::sleep_until(deadline) => Event::DeadlineReached,
            changed = deadline_rx.changed() => match changed {
                Ok(()) => Event::DeadlineMoved,
                Err(_) => Event::KillRequested,
            },
        };

        match event {
            Event::Exited(Ok(status)) => {
                // Background children of the leader die with it.
                signal_group(pid);
                break ExitOutcome::Exited(exit_code(status));
            }
            Event::Exited(Err(e)) => {
                tracing::error!("Failed to wait for process {:?}: {}", pid, e);
                kill_group(&mut child, pid).await;
                break ExitOutcome::Killed;
            }
            Event::KillRequested => {
                tracing::debug!("Killing process {:?}", pid);
                kill_group(&mut child, pid).await;
                break ExitOutcome::Killed;
            }
            Event::DeadlineReached => {
                tracing::info!("Process {:?} exceeded its deadline", pid);
                kill_group(&mut child, pid).await;
                break ExitOutcome::TimedOut;
            }
            Event::DeadlineMoved => continue,
        }
    };

    for mut pump in pumps.into_iter().flatten() {
        if tokio::time::timeout(PUMP_DRAIN_GRACE, &mut pump).await.is_err() {
            tracing::warn!("Output of process {:?} still open after exit", pid);
            pump.abort();
        }
    }

    let _ = exit_tx.send(Some(outcome));
}

/// Sends SIGKILL to the whole process group. Returns false when the group
/// could not be signalled for a reason other than being empty.
fn signal_group(pid: Option<u32>) -> bool {
    let Some(pid) = pid else {
        return false;
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => true,
        Err(e) => {
            tracing::warn!("Failed to signal process group {}: {}", pid, e);
            false
        }
    }
}

async fn kill_group(child: &mut Child, pid: Option<u32>) {
    if !signal_group(pid) {
        let _ = child.start_kill();
    }

    if let Err(e) = child.wait().await {
        tracing::warn!("Failed to reap killed process {:?}: {}", pid, e);
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| SIGNAL_EXIT_BASE + signal))
        .unwrap_or(-1)
}

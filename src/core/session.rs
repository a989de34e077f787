use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::core::domain::{ExitOutcome, Language, SessionSnapshot, SessionStatus};
use crate::core::prompt::{PromptState, detect_prompt, last_output_line};
use crate::native::process::{LiveProcess, Stream};
use crate::native::workspace::Workspace;

#[derive(Debug, Default)]
struct SessionState {
    status: SessionStatus,
    is_interactive: bool,
    last_output_line: String,
    exit_code: Option<i32>,
    /// Set when a terminal session keeps its output for a later read.
    retained_until: Option<Instant>,
}

/// Tracked state of one submitted execution.
///
/// The session owns its process exclusively: only the session writes to the
/// child's stdin or kills it. Status only moves forward; once terminal it
/// never changes again.
#[derive(Debug)]
pub struct ExecutionSession {
    pub id: Uuid,
    pub language: Language,
    pub workspace: Workspace,
    pub created_at: chrono::DateTime<chrono::Utc>,
    started_at: Instant,
    state: Mutex<SessionState>,
    process: OnceLock<LiveProcess>,
    /// Serializes input exchanges so each delta has a stable start mark.
    exchange: tokio::sync::Mutex<()>,
}

impl ExecutionSession {
    pub fn new(id: Uuid, language: Language, workspace: Workspace, is_interactive: bool) -> Self {
        Self {
            id,
            language,
            workspace,
            created_at: chrono::Utc::now(),
            started_at: Instant::now(),
            state: Mutex::new(SessionState {
                is_interactive,
                ..SessionState::default()
            }),
            process: OnceLock::new(),
            exchange: tokio::sync::Mutex::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> SessionStatus {
        self.state().status
    }

    pub fn is_interactive(&self) -> bool {
        self.state().is_interactive
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.state().exit_code
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Moves to `next` unless the session is already terminal.
    pub fn transition(&self, next: SessionStatus) -> bool {
        let mut state = self.state();
        if state.status.is_terminal() {
            return false;
        }
        tracing::debug!("Session {} status {:?} -> {:?}", self.id, state.status, next);
        state.status = next;
        true
    }

    pub fn upgrade_to_interactive(&self) {
        self.state().is_interactive = true;
    }

    /// Records the exit of the process. The first terminal transition wins,
    /// so a stop followed by the kill's exit still reads `Stopped`.
    pub fn finish(&self, outcome: ExitOutcome) -> SessionStatus {
        let mut state = self.state();
        if !state.status.is_terminal() {
            state.status = outcome.terminal_status();
        }
        if state.exit_code.is_none() {
            state.exit_code = Some(outcome.exit_code());
        }
        state.status
    }

    /// Fails the session before any process ran.
    pub fn fail(&self) {
        let mut state = self.state();
        if !state.status.is_terminal() {
            state.status = SessionStatus::Failed;
        }
    }

    pub fn retain_for(&self, grace: Duration) {
        self.state().retained_until = Some(Instant::now() + grace);
    }

    pub fn retention_expired(&self, now: Instant) -> bool {
        matches!(self.state().retained_until, Some(until) if until <= now)
    }

    /// Attaches the session's single process. Returns false if one is
    /// already attached.
    pub fn attach(&self, process: LiveProcess) -> bool {
        self.process.set(process).is_ok()
    }

    pub fn process(&self) -> Option<&LiveProcess> {
        self.process.get()
    }

    pub async fn begin_exchange(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.exchange.lock().await
    }

    /// Re-applies the prompt heuristic to the current stdout tail and keeps
    /// `Running`/`WaitingInput` in sync with it.
    pub fn observe_output(&self) -> PromptState {
        let stdout = self.stdout();
        let prompt = detect_prompt(&stdout);

        let mut state = self.state();
        state.last_output_line = last_output_line(&stdout).to_string();
        if !state.status.is_terminal() {
            state.status = if prompt.waiting_for_input {
                SessionStatus::WaitingInput
            } else {
                SessionStatus::Running
            };
        }
        prompt
    }

    pub fn stdout(&self) -> String {
        self.process()
            .map(|process| process.output().stdout())
            .unwrap_or_default()
    }

    pub fn stderr(&self) -> String {
        self.process()
            .map(|process| process.output().stderr())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (stdout_bytes, stderr_bytes) = self
            .process()
            .map(|process| {
                (
                    process.output().len(Stream::Stdout),
                    process.output().len(Stream::Stderr),
                )
            })
            .unwrap_or((0, 0));

        let state = self.state();
        SessionSnapshot {
            id: self.id,
            language: self.language,
            status: state.status,
            is_interactive: state.is_interactive,
            exit_code: state.exit_code,
            stdout_bytes,
            stderr_bytes,
            last_output_line: state.last_output_line.clone(),
            elapsed_ms: self.elapsed_ms(),
            created_at: self.created_at,
        }
    }
}

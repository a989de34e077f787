use std::fmt;
use std::path::PathBuf;

use uuid::Uuid;

use crate::constants::{KILLED_EXIT_CODE, TIMEOUT_EXIT_CODE};
use crate::core::prompt::PromptState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    C,
    Cpp,
    Java,
    Rust,
    Go,
    Shell,
}

impl Language {
    pub const ALL: [Language; 8] = [
        Language::Python,
        Language::JavaScript,
        Language::C,
        Language::Cpp,
        Language::Java,
        Language::Rust,
        Language::Go,
        Language::Shell,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Shell => "shell",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct CompilationLimits {
    pub time_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ExecutionLimits {
    pub time_ms: u64,
    pub max_output_bytes: usize,
}

/// A fully resolved argv invocation. Never passed through a shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    Executable,
    Script,
}

/// What the run step executes: either a compiled binary or the source itself
/// handed to an interpreter. Lives inside the session workspace and is never
/// mutated after compilation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub id: Uuid,
    pub kind: ArtifactKind,
    pub command: ProcessCommand,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StdinSource {
    /// Empty stdin, EOF on first read.
    Null,
    /// Live pipe owned by the session.
    Piped,
    /// Static file inside the workspace.
    File(PathBuf),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Created,
    Compiling,
    Running,
    WaitingInput,
    Completed,
    Failed,
    Stopped,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Stopped
        )
    }
}

/// How a supervised process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    TimedOut,
    Killed,
}

impl ExitOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitOutcome::Exited(code) => *code,
            ExitOutcome::TimedOut => TIMEOUT_EXIT_CODE,
            ExitOutcome::Killed => KILLED_EXIT_CODE,
        }
    }

    pub fn terminal_status(&self) -> SessionStatus {
        match self {
            ExitOutcome::Exited(0) => SessionStatus::Completed,
            ExitOutcome::Exited(_) | ExitOutcome::TimedOut => SessionStatus::Failed,
            ExitOutcome::Killed => SessionStatus::Stopped,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffInfo {
    LengthMismatch {
        expected_length: usize,
        actual_length: usize,
    },
    Mismatch {
        position: usize,
        expected_context: String,
        actual_context: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestResult {
    pub passed: bool,
    pub actual_output: String,
    pub normalized_actual: String,
    pub normalized_expected: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
    pub diff_info: Option<DiffInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatteryReport {
    pub passed_count: usize,
    pub total_count: usize,
    pub results: Vec<TestResult>,
    pub compile_error: Option<String>,
}

impl BatteryReport {
    pub fn all_passed(&self) -> bool {
        self.compile_error.is_none() && self.passed_count == self.total_count
    }
}

/// Result of `start`. `interactive` is set while the program is still
/// running and waiting for an exchange; `exit_code` is set once it ended.
#[derive(Clone, Debug)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub success: bool,
    pub status: SessionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub interactive: Option<PromptState>,
    pub execution_time_ms: u64,
    pub battery: Option<BatteryReport>,
}

#[derive(Clone, Debug)]
pub struct InputReport {
    pub stdout_delta: String,
    pub full_stdout: String,
    pub stderr: String,
    pub prompt: PromptState,
    pub exit_code: Option<i32>,
    pub status: SessionStatus,
}

#[derive(Clone, Debug)]
pub struct FinalReport {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub status: SessionStatus,
}

#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub language: Language,
    pub status: SessionStatus,
    pub is_interactive: bool,
    pub exit_code: Option<i32>,
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,
    pub last_output_line: String,
    pub elapsed_ms: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone, Debug)]
pub struct HealthReport {
    pub status: &'static str,
    pub supported_languages: Vec<String>,
    pub active_sessions: usize,
}

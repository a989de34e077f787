use tonic::Status;
use uuid::Uuid;

use crate::core::{domain, errors::SandboxError};
use crate::grpc::models::{self, chrono_to_prost, diff_info};

pub fn parse_execution_id(raw: &str) -> Result<Uuid, SandboxError> {
    Uuid::parse_str(raw.trim()).map_err(|_| SandboxError::SessionNotFound {
        id: raw.to_string(),
    })
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl From<SandboxError> for Status {
    fn from(err: SandboxError) -> Self {
        if err.is_infrastructure() {
            tracing::error!("Sandbox fault: {}", err);
        }
        match err {
            SandboxError::Validation { .. } | SandboxError::UnsupportedLanguage { .. } => {
                Status::invalid_argument(err.to_string())
            }
            SandboxError::SessionNotFound { .. } => Status::not_found(err.to_string()),
            SandboxError::Workspace { .. } | SandboxError::Internal { .. } => {
                Status::internal(err.to_string())
            }
        }
    }
}

/// Submitter-facing errors that travel inside a normal response.
pub fn error_info(err: &SandboxError) -> Option<models::ErrorInfo> {
    match err {
        SandboxError::UnsupportedLanguage { .. } => Some(models::ErrorInfo {
            kind: "unsupported_language".to_string(),
            message: err.to_string(),
        }),
        _ => None,
    }
}

impl From<domain::SessionStatus> for models::SessionStatus {
    fn from(status: domain::SessionStatus) -> Self {
        match status {
            domain::SessionStatus::Created => models::SessionStatus::Created,
            domain::SessionStatus::Compiling => models::SessionStatus::Compiling,
            domain::SessionStatus::Running => models::SessionStatus::Running,
            domain::SessionStatus::WaitingInput => models::SessionStatus::WaitingInput,
            domain::SessionStatus::Completed => models::SessionStatus::Completed,
            domain::SessionStatus::Failed => models::SessionStatus::Failed,
            domain::SessionStatus::Stopped => models::SessionStatus::Stopped,
        }
    }
}

impl From<models::TestCase> for domain::TestCase {
    fn from(case: models::TestCase) -> Self {
        Self {
            input: case.input,
            expected_output: case.expected_output,
        }
    }
}

impl From<domain::DiffInfo> for models::DiffInfo {
    fn from(diff: domain::DiffInfo) -> Self {
        let kind = match diff {
            domain::DiffInfo::LengthMismatch {
                expected_length,
                actual_length,
            } => diff_info::Kind::LengthMismatch(models::LengthMismatch {
                expected_length: expected_length as u64,
                actual_length: actual_length as u64,
            }),
            domain::DiffInfo::Mismatch {
                position,
                expected_context,
                actual_context,
            } => diff_info::Kind::Mismatch(models::Mismatch {
                position: position as u64,
                expected_context,
                actual_context,
            }),
        };
        Self { kind: Some(kind) }
    }
}

impl From<domain::TestResult> for models::TestResult {
    fn from(result: domain::TestResult) -> Self {
        Self {
            passed: result.passed,
            actual_output: result.actual_output,
            normalized_actual: result.normalized_actual,
            normalized_expected: result.normalized_expected,
            error: result.error,
            execution_time_ms: result.execution_time_ms,
            diff_info: result.diff_info.map(Into::into),
            exit_code: result.exit_code,
        }
    }
}

impl From<domain::BatteryReport> for models::BatteryData {
    fn from(report: domain::BatteryReport) -> Self {
        Self {
            passed_count: count(report.passed_count),
            total_count: count(report.total_count),
            results: report.results.into_iter().map(Into::into).collect(),
            compile_error: report.compile_error,
        }
    }
}

impl From<domain::ExecutionReport> for models::ExecuteResponse {
    fn from(report: domain::ExecutionReport) -> Self {
        let is_interactive = report.interactive.is_some();
        let interactive = report.interactive.unwrap_or_default();

        Self {
            success: report.success,
            execution_id: report.execution_id.to_string(),
            data: Some(models::ExecutionData {
                stdout: report.stdout,
                stderr: report.stderr,
                exit_code: report.exit_code,
                is_interactive,
                is_waiting_for_input: interactive.waiting_for_input,
                waiting_prompt: interactive.prompt,
                status: models::SessionStatus::from(report.status).into(),
                execution_time_ms: report.execution_time_ms,
                battery: report.battery.map(Into::into),
            }),
            error: None,
        }
    }
}

impl From<domain::InputReport> for models::SendInputResponse {
    fn from(report: domain::InputReport) -> Self {
        Self {
            success: true,
            data: Some(models::InputData {
                stdout: report.stdout_delta,
                full_stdout: report.full_stdout,
                stderr: report.stderr,
                is_waiting_for_input: report.prompt.waiting_for_input,
                waiting_prompt: report.prompt.prompt,
                exit_code: report.exit_code,
                status: models::SessionStatus::from(report.status).into(),
            }),
        }
    }
}

impl From<domain::FinalReport> for models::StopResponse {
    fn from(report: domain::FinalReport) -> Self {
        Self {
            success: true,
            data: Some(models::FinalData {
                stdout: report.stdout,
                stderr: report.stderr,
                exit_code: report.exit_code,
                status: models::SessionStatus::from(report.status).into(),
            }),
        }
    }
}

impl From<domain::SessionSnapshot> for models::StatusResponse {
    fn from(snapshot: domain::SessionSnapshot) -> Self {
        Self {
            execution_id: snapshot.id.to_string(),
            language: snapshot.language.to_string(),
            status: models::SessionStatus::from(snapshot.status).into(),
            is_interactive: snapshot.is_interactive,
            exit_code: snapshot.exit_code,
            stdout_bytes: snapshot.stdout_bytes as u64,
            stderr_bytes: snapshot.stderr_bytes as u64,
            last_output_line: snapshot.last_output_line,
            elapsed_ms: snapshot.elapsed_ms,
            created_at: Some(chrono_to_prost(snapshot.created_at)),
        }
    }
}

impl From<domain::HealthReport> for models::HealthResponse {
    fn from(report: domain::HealthReport) -> Self {
        Self {
            status: report.status.to_string(),
            supported_languages: report.supported_languages,
            active_sessions: count(report.active_sessions),
        }
    }
}

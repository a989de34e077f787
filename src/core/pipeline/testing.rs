use std::path::PathBuf;

use futures::{StreamExt, stream};

use crate::core::{
    checker::{compile_failure, evaluate},
    domain::{
        Artifact, BatteryReport, CompilationLimits, ExecutionLimits, StdinSource, TestCase,
        TestResult,
    },
    errors::SandboxError,
    language::LanguageConfig,
    pipeline::compiling::{CompileOutcome, into_outcome},
    traits::executor::Executor,
};
use crate::native::workspace::Workspace;

#[derive(Clone, Debug)]
pub struct BatterySettings {
    pub compilation: CompilationLimits,
    pub execution: ExecutionLimits,
    pub parallelism: usize,
}

/// Runs every case against one submission in `workspace`.
///
/// The source is compiled once and the artifact is shared by all cases. Each
/// case gets its own stdin file. Up to `parallelism` cases run at a time and
/// results keep the order of `cases`. A failed compile fails every case with
/// the compiler output.
#[tracing::instrument(skip_all, fields(workspace = %workspace.id(), cases = cases.len()))]
pub async fn run_battery(
    workspace: &Workspace,
    language: &LanguageConfig,
    executor: &dyn Executor,
    cases: &[TestCase],
    settings: &BatterySettings,
) -> Result<BatteryReport, SandboxError> {
    let compilation_result = executor
        .compile(workspace, language, &settings.compilation)
        .await;

    let artifact = match into_outcome(compilation_result)? {
        CompileOutcome::Compiled(artifact) => artifact,
        CompileOutcome::Rejected { stderr } => {
            tracing::debug!("Battery compile failed");
            let results = cases
                .iter()
                .map(|case| compile_failure(case, &stderr))
                .collect();
            return Ok(aggregate(results, Some(stderr)));
        }
    };

    let mut inputs = Vec::with_capacity(cases.len());
    for (idx, case) in cases.iter().enumerate() {
        inputs.push(workspace.write_file(&format!("input_{idx}.txt"), &case.input).await?);
    }

    let runs: Vec<_> = cases
        .iter()
        .zip(inputs)
        .map(|(case, input)| run_case(executor, &artifact, case, input, &settings.execution))
        .collect();
    let results: Vec<TestResult> = stream::iter(runs)
        .buffered(settings.parallelism.max(1))
        .collect()
        .await;

    let report = aggregate(results, None);
    tracing::info!(
        "Battery finished: {}/{} passed",
        report.passed_count,
        report.total_count
    );
    Ok(report)
}

async fn run_case(
    executor: &dyn Executor,
    artifact: &Artifact,
    case: &TestCase,
    input: PathBuf,
    limits: &ExecutionLimits,
) -> TestResult {
    let result = executor.run(artifact, StdinSource::File(input), limits).await;
    evaluate(case, result)
}

fn aggregate(results: Vec<TestResult>, compile_error: Option<String>) -> BatteryReport {
    BatteryReport {
        passed_count: results.iter().filter(|result| result.passed).count(),
        total_count: results.len(),
        results,
        compile_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{ArtifactKind, Language, ProcessCommand};
    use crate::core::language::default_config;
    use crate::core::traits::executor::{CompileError, MockExecutor, RunError, RunResult};
    use crate::native::executor::NativeExecutor;
    use uuid::Uuid;

    fn settings(parallelism: usize) -> BatterySettings {
        BatterySettings {
            compilation: CompilationLimits { time_ms: 5000 },
            execution: ExecutionLimits {
                time_ms: 5000,
                max_output_bytes: 1024 * 1024,
            },
            parallelism,
        }
    }

    fn case(input: &str, expected: &str) -> TestCase {
        TestCase {
            input: input.to_string(),
            expected_output: expected.to_string(),
        }
    }

    fn artifact() -> Artifact {
        Artifact {
            id: Uuid::new_v4(),
            kind: ArtifactKind::Executable,
            command: ProcessCommand {
                program: "/tmp/main".to_string(),
                args: vec![],
                cwd: PathBuf::from("/tmp"),
            },
        }
    }

    fn run_result(stdout: &str) -> RunResult {
        RunResult {
            status: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            execution_time_ms: 10,
            truncated: false,
        }
    }

    #[tokio::test]
    async fn test_battery_counts_and_order() {
        let root = tempfile::tempdir().unwrap();
        let language = default_config(Language::Shell);
        let workspace = Workspace::create(root.path(), Uuid::new_v4()).await.unwrap();
        workspace
            .write_source(&language, "read a b\necho $((a + b))\n")
            .await
            .unwrap();

        let cases = vec![
            case("1 2\n", "3"),
            case("10 20\n", "30"),
            case("2 2\n", "5"),
            case("0 0\n", " 0 \n"),
        ];

        let report = run_battery(
            &workspace,
            &language,
            &NativeExecutor::new(),
            &cases,
            &settings(2),
        )
        .await
        .unwrap();

        assert_eq!(report.total_count, 4);
        assert_eq!(report.passed_count, 3);
        let verdicts: Vec<bool> = report.results.iter().map(|r| r.passed).collect();
        assert_eq!(verdicts, vec![true, true, false, true]);
        assert_eq!(report.results[1].actual_output, "30\n");
        assert!(report.results[2].diff_info.is_some());
        assert!(report.compile_error.is_none());
    }

    #[tokio::test]
    async fn test_compile_failure_short_circuits() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path(), Uuid::new_v4()).await.unwrap();

        let mut executor = MockExecutor::new();
        executor
            .expect_compile()
            .times(1)
            .return_const(Err(CompileError::CompilationFailed {
                stderr: "main.cpp:1: error".to_string(),
            }));
        executor.expect_run().never();

        let cases = vec![case("", "a"), case("", "b")];
        let report = run_battery(
            &workspace,
            &default_config(Language::Cpp),
            &executor,
            &cases,
            &settings(4),
        )
        .await
        .unwrap();

        assert_eq!(report.passed_count, 0);
        assert_eq!(report.total_count, 2);
        assert_eq!(report.compile_error.as_deref(), Some("main.cpp:1: error"));
        assert!(
            report
                .results
                .iter()
                .all(|r| r.error.as_deref() == Some("main.cpp:1: error"))
        );
    }

    #[tokio::test]
    async fn test_compiles_once_for_all_cases() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path(), Uuid::new_v4()).await.unwrap();

        let mut executor = MockExecutor::new();
        executor
            .expect_compile()
            .times(1)
            .return_const(Ok(artifact()));
        executor
            .expect_run()
            .times(3)
            .returning(|_, stdin, _| match stdin {
                StdinSource::File(path) => {
                    Ok(run_result(&std::fs::read_to_string(path).unwrap()))
                }
                other => panic!("Unexpected stdin {:?}", other),
            });

        let cases = vec![case("a", "a"), case("b", "b"), case("c", "x")];
        let report = run_battery(
            &workspace,
            &default_config(Language::Cpp),
            &executor,
            &cases,
            &settings(3),
        )
        .await
        .unwrap();

        assert_eq!(report.passed_count, 2);
        assert_eq!(report.results[2].actual_output, "c");
    }

    #[tokio::test]
    async fn test_runner_failure_fails_case_only() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path(), Uuid::new_v4()).await.unwrap();

        let mut executor = MockExecutor::new();
        executor.expect_compile().return_const(Ok(artifact()));
        executor.expect_run().returning(|_, _, _| {
            Err(RunError::FailedToLaunch {
                msg: "exec format error".to_string(),
            })
        });

        let report = run_battery(
            &workspace,
            &default_config(Language::Cpp),
            &executor,
            &[case("", "1")],
            &settings(1),
        )
        .await
        .unwrap();

        assert_eq!(report.passed_count, 0);
        assert!(report.results[0].error.as_deref().unwrap().contains("exec format error"));
    }

    #[tokio::test]
    async fn test_internal_compile_error_is_fault() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path(), Uuid::new_v4()).await.unwrap();

        let mut executor = MockExecutor::new();
        executor.expect_compile().return_const(Err(CompileError::Internal {
            msg: "g++ missing".to_string(),
        }));

        let result = run_battery(
            &workspace,
            &default_config(Language::Cpp),
            &executor,
            &[case("", "1")],
            &settings(1),
        )
        .await;

        assert!(matches!(result, Err(SandboxError::Internal { .. })));
    }

    #[tokio::test]
    async fn test_battery_runs_on_spawned_task() {
        let root = tempfile::tempdir().unwrap();
        let language = default_config(Language::Shell);
        let workspace = Workspace::create(root.path(), Uuid::new_v4()).await.unwrap();
        workspace.write_source(&language, "cat\n").await.unwrap();

        let handle = tokio::spawn(async move {
            let cases = vec![case("one\n", "one"), case("two\n", "two")];
            run_battery(
                &workspace,
                &language,
                &NativeExecutor::new(),
                &cases,
                &settings(2),
            )
            .await
        });

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.passed_count, 2);
    }
}

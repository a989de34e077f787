//! Output comparison for test batteries.
//!
//! Normalization rules, applied to expected and actual output alike:
//! - `\r\n` and bare `\r` become `\n`;
//! - runs of whitespace inside a line collapse to one space;
//! - every line is trimmed, then the whole text is trimmed;
//! - case is folded to lowercase.
//!
//! Blank lines in the middle of the output are kept.

use itertools::Itertools;

use crate::constants::DIFF_CONTEXT_CHARS;
use crate::core::domain::{DiffInfo, TestCase, TestResult};
use crate::core::traits::executor::{RunError, RunResult};

pub fn normalize(output: &str) -> String {
    let unified = output.replace("\r\n", "\n").replace('\r', "\n");

    let lines = unified
        .split('\n')
        .map(|line| line.split_whitespace().join(" "))
        .join("\n");

    lines.trim().to_lowercase()
}

/// First point of divergence between two normalized strings, or `None` when
/// they are equal. Positions and context windows count characters.
pub fn diff(expected: &str, actual: &str) -> Option<DiffInfo> {
    let expected: Vec<char> = expected.chars().collect();
    let actual: Vec<char> = actual.chars().collect();

    if expected.len() != actual.len() {
        return Some(DiffInfo::LengthMismatch {
            expected_length: expected.len(),
            actual_length: actual.len(),
        });
    }

    let position = expected.iter().zip(&actual).position(|(e, a)| e != a)?;
    Some(DiffInfo::Mismatch {
        position,
        expected_context: context_window(&expected, position),
        actual_context: context_window(&actual, position),
    })
}

fn context_window(chars: &[char], position: usize) -> String {
    let start = position.saturating_sub(DIFF_CONTEXT_CHARS);
    let end = (position + DIFF_CONTEXT_CHARS).min(chars.len());
    chars[start..end].iter().collect()
}

/// Verdict for one case. A case passes only when the normalized outputs are
/// equal, the exit code is zero and nothing was written to stderr.
pub fn evaluate(case: &TestCase, result: Result<RunResult, RunError>) -> TestResult {
    let normalized_expected = normalize(&case.expected_output);

    let run = match result {
        Ok(run) => run,
        Err(RunError::TimeLimitExceeded { result }) => {
            let normalized_actual = normalize(&result.stdout);
            return TestResult {
                passed: false,
                diff_info: diff(&normalized_expected, &normalized_actual),
                actual_output: result.stdout,
                normalized_actual,
                normalized_expected,
                error: Some(format!(
                    "Time limit exceeded after {} ms",
                    result.execution_time_ms
                )),
                exit_code: Some(result.status),
                execution_time_ms: result.execution_time_ms,
            };
        }
        Err(err) => {
            tracing::error!("Internal error while running test case: {}", err);
            return TestResult {
                passed: false,
                actual_output: String::new(),
                normalized_actual: String::new(),
                diff_info: diff(&normalized_expected, ""),
                normalized_expected,
                error: Some(err.to_string()),
                exit_code: None,
                execution_time_ms: 0,
            };
        }
    };

    if run.truncated {
        tracing::warn!("Test case output truncated at the buffer limit");
    }

    let normalized_actual = normalize(&run.stdout);
    let outputs_match = normalized_actual == normalized_expected;
    let passed = outputs_match && run.status == 0 && run.stderr.is_empty();

    let error = if !run.stderr.is_empty() {
        Some(run.stderr.clone())
    } else if run.status != 0 {
        Some(format!("Process exited with code {}", run.status))
    } else {
        None
    };

    TestResult {
        passed,
        diff_info: if outputs_match {
            None
        } else {
            diff(&normalized_expected, &normalized_actual)
        },
        actual_output: run.stdout,
        normalized_actual,
        normalized_expected,
        error,
        exit_code: Some(run.status),
        execution_time_ms: run.execution_time_ms,
    }
}

/// Every case fails with the shared compiler error.
pub fn compile_failure(case: &TestCase, compiler_error: &str) -> TestResult {
    TestResult {
        passed: false,
        actual_output: String::new(),
        normalized_actual: String::new(),
        normalized_expected: normalize(&case.expected_output),
        error: Some(compiler_error.to_string()),
        exit_code: None,
        execution_time_ms: 0,
        diff_info: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TIMEOUT_EXIT_CODE;

    fn run_result(status: i32, stdout: &str, stderr: &str) -> RunResult {
        RunResult {
            status,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            execution_time_ms: 12,
            truncated: false,
        }
    }

    fn case(input: &str, expected: &str) -> TestCase {
        TestCase {
            input: input.to_string(),
            expected_output: expected.to_string(),
        }
    }

    #[test]
    fn test_normalize_rules() {
        assert_eq!(normalize("  Hello   World \r\n"), "hello world");
        assert_eq!(normalize("a\r\nb\rc\n"), "a\nb\nc");
        assert_eq!(normalize("\t1\t 2 \n  3  "), "1 2\n3");
        assert_eq!(normalize("A\n\nB"), "a\n\nb");
        assert_eq!(normalize("\n\n  \n"), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "",
            "  Hello   World \r\n",
            "A\r\n\r\nB\t\tC\r",
            "  \n mixed CASE\u{a0}text \n\n",
            "ÄÖÜ ß İstanbul",
            "line1\n   line2   \n\t\tline3",
            "\r\r\r",
        ];

        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "sample {sample:?}");
        }
    }

    #[test]
    fn test_diff_equal_strings() {
        assert_eq!(diff("abc", "abc"), None);
        assert_eq!(diff("", ""), None);
    }

    #[test]
    fn test_diff_length_mismatch() {
        assert_eq!(
            diff("12345", "123"),
            Some(DiffInfo::LengthMismatch {
                expected_length: 5,
                actual_length: 3
            })
        );
    }

    #[test]
    fn test_diff_first_divergence_with_bounded_context() {
        let expected = "abcdefghijklmnopqrstuvwxyz";
        let actual = "abcdefghijklmnopqrsTuvwxyz";

        assert_eq!(
            diff(expected, actual),
            Some(DiffInfo::Mismatch {
                position: 19,
                expected_context: "jklmnopqrstuvwxyz".to_string(),
                actual_context: "jklmnopqrsTuvwxyz".to_string(),
            })
        );
    }

    #[test]
    fn test_diff_context_at_start() {
        assert_eq!(
            diff("xbc", "ybc"),
            Some(DiffInfo::Mismatch {
                position: 0,
                expected_context: "xbc".to_string(),
                actual_context: "ybc".to_string(),
            })
        );
    }

    #[test]
    fn test_diff_counts_characters_not_bytes() {
        assert_eq!(
            diff("ñandú", "ñandu"),
            Some(DiffInfo::Mismatch {
                position: 4,
                expected_context: "ñandú".to_string(),
                actual_context: "ñandu".to_string(),
            })
        );
    }

    #[test]
    fn test_evaluate_correct_output() {
        let result = evaluate(&case("1 2", "3\n"), Ok(run_result(0, "3\r\n", "")));
        assert!(result.passed);
        assert_eq!(result.diff_info, None);
        assert_eq!(result.error, None);
        assert_eq!(result.exit_code, Some(0));
    }

    #[test]
    fn test_evaluate_case_insensitive_match() {
        let result = evaluate(&case("", "YES"), Ok(run_result(0, "yes", "")));
        assert!(result.passed);
    }

    #[test]
    fn test_evaluate_wrong_output() {
        let result = evaluate(&case("", "hello"), Ok(run_result(0, "hallo", "")));
        assert!(!result.passed);
        assert!(matches!(
            result.diff_info,
            Some(DiffInfo::Mismatch { position: 1, .. })
        ));
    }

    #[test]
    fn test_evaluate_nonzero_exit_fails_even_with_matching_output() {
        let result = evaluate(&case("", "ok"), Ok(run_result(3, "ok", "")));
        assert!(!result.passed);
        assert_eq!(result.diff_info, None);
        assert_eq!(result.error.as_deref(), Some("Process exited with code 3"));
    }

    #[test]
    fn test_evaluate_stderr_fails_even_with_matching_output() {
        let result = evaluate(&case("", "ok"), Ok(run_result(0, "ok", "warning")));
        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("warning"));
    }

    #[test]
    fn test_evaluate_timeout() {
        let result = evaluate(
            &case("", "done"),
            Err(RunError::TimeLimitExceeded {
                result: run_result(TIMEOUT_EXIT_CODE, "", ""),
            }),
        );
        assert!(!result.passed);
        assert_eq!(result.exit_code, Some(TIMEOUT_EXIT_CODE));
        assert!(result.error.unwrap().starts_with("Time limit exceeded"));
    }

    #[test]
    fn test_evaluate_launch_failure() {
        let result = evaluate(
            &case("", "done"),
            Err(RunError::FailedToLaunch {
                msg: "no such file".to_string(),
            }),
        );
        assert!(!result.passed);
        assert_eq!(result.exit_code, None);
        assert!(result.error.unwrap().contains("no such file"));
    }
}

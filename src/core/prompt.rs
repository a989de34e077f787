//! "Waiting for input" heuristic.
//!
//! There is no reliable way to know whether a child process is blocked on a
//! read of stdin, so this module guesses from the output tail. The inspected
//! fragment is the text after the final newline. A non-empty fragment has no
//! line terminator yet, which is how prompts such as `Name: `, `cmd> ` or
//! `Are you sure? ` look, so it reports `waiting_for_input`. Output that ends
//! with a newline is never waiting, whatever punctuation its last line has.
//!
//! This is knowingly eager: a program that prints `Done.` without `\n` and
//! keeps computing is reported as waiting. Callers must treat the flag as a
//! hint.

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PromptState {
    pub waiting_for_input: bool,
    pub prompt: Option<String>,
}

/// Last non-empty line of `output`, without its line terminator.
pub fn last_output_line(output: &str) -> &str {
    output
        .lines()
        .rev()
        .map(|line| line.trim_end_matches('\r'))
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
}

/// Text after the final newline of `output`.
pub fn trailing_fragment(output: &str) -> &str {
    output
        .rsplit('\n')
        .next()
        .unwrap_or("")
        .trim_end_matches('\r')
}

pub fn detect_prompt(output: &str) -> PromptState {
    let fragment = trailing_fragment(output).trim();
    if fragment.is_empty() {
        return PromptState::default();
    }

    PromptState {
        waiting_for_input: true,
        prompt: Some(fragment.to_string()),
    }
}

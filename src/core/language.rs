//! Language registry.
//!
//! Every supported language maps to a static [`LanguageConfig`]: the source
//! file it is written to, an optional compile step and a run step. Commands
//! are argv templates; placeholders are substituted per argument so no
//! submitted text ever reaches a shell.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use itertools::Itertools;

use crate::constants::{BINARY_NAME, SOURCE_STEM};
use crate::core::domain::{Language, ProcessCommand};
use crate::core::errors::SandboxError;

const SOURCE_PLACEHOLDER: &str = "{source}";
const BINARY_PLACEHOLDER: &str = "{binary}";
const DIR_PLACEHOLDER: &str = "{dir}";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

impl CommandTemplate {
    /// True when the command executes the compiled binary itself.
    pub fn runs_binary(&self) -> bool {
        self.program == BINARY_PLACEHOLDER
    }

    pub fn render(&self, dir: &Path, source_file: &str) -> ProcessCommand {
        let binary = dir.join(BINARY_NAME);
        let substitute = |token: &str| match token {
            SOURCE_PLACEHOLDER => source_file.to_string(),
            BINARY_PLACEHOLDER => binary.display().to_string(),
            DIR_PLACEHOLDER => dir.display().to_string(),
            literal => literal.to_string(),
        };

        ProcessCommand {
            program: substitute(self.program),
            args: self.args.iter().map(|arg| substitute(*arg)).collect(),
            cwd: dir.to_path_buf(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LanguageConfig {
    pub language: Language,
    pub extension: &'static str,
    pub source_stem: &'static str,
    pub compile: Option<CommandTemplate>,
    pub run: CommandTemplate,
    /// Source fragments that indicate the program blocks on stdin.
    pub stdin_markers: &'static [&'static str],
}

impl LanguageConfig {
    pub fn source_file_name(&self) -> String {
        format!("{}.{}", self.source_stem, self.extension)
    }

    pub fn requires_compilation(&self) -> bool {
        self.compile.is_some()
    }

    /// Static inspection for blocking-read constructs.
    pub fn reads_stdin(&self, code: &str) -> bool {
        self.stdin_markers.iter().any(|marker| code.contains(marker))
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "c" => Ok(Language::C),
            "cpp" | "c++" | "cxx" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "rust" | "rs" => Ok(Language::Rust),
            "go" | "golang" => Ok(Language::Go),
            "shell" | "sh" | "bash" => Ok(Language::Shell),
            _ => Err(SandboxError::UnsupportedLanguage {
                language: s.to_string(),
            }),
        }
    }
}

pub fn default_config(language: Language) -> LanguageConfig {
    match language {
        Language::Python => LanguageConfig {
            language,
            extension: "py",
            source_stem: SOURCE_STEM,
            compile: None,
            run: CommandTemplate {
                program: "python3",
                args: &["-u", SOURCE_PLACEHOLDER],
            },
            stdin_markers: &["input(", "sys.stdin", "fileinput"],
        },
        Language::JavaScript => LanguageConfig {
            language,
            extension: "js",
            source_stem: SOURCE_STEM,
            compile: None,
            run: CommandTemplate {
                program: "node",
                args: &[SOURCE_PLACEHOLDER],
            },
            stdin_markers: &["readline", "process.stdin", "prompt("],
        },
        Language::C => LanguageConfig {
            language,
            extension: "c",
            source_stem: SOURCE_STEM,
            compile: Some(CommandTemplate {
                program: "gcc",
                args: &["-O2", "-o", BINARY_PLACEHOLDER, SOURCE_PLACEHOLDER, "-lm"],
            }),
            run: CommandTemplate {
                program: BINARY_PLACEHOLDER,
                args: &[],
            },
            stdin_markers: &["scanf", "getchar", "fgets", "gets(", "getline", "read("],
        },
        Language::Cpp => LanguageConfig {
            language,
            extension: "cpp",
            source_stem: SOURCE_STEM,
            compile: Some(CommandTemplate {
                program: "g++",
                args: &["-std=c++17", "-O2", "-o", BINARY_PLACEHOLDER, SOURCE_PLACEHOLDER],
            }),
            run: CommandTemplate {
                program: BINARY_PLACEHOLDER,
                args: &[],
            },
            stdin_markers: &["cin", "getline", "scanf", "getchar", "fgets"],
        },
        Language::Java => LanguageConfig {
            language,
            extension: "java",
            source_stem: "Main",
            compile: Some(CommandTemplate {
                program: "javac",
                args: &[SOURCE_PLACEHOLDER],
            }),
            run: CommandTemplate {
                program: "java",
                args: &["-cp", DIR_PLACEHOLDER, "Main"],
            },
            stdin_markers: &["Scanner", "BufferedReader", "System.in", "Console"],
        },
        Language::Rust => LanguageConfig {
            language,
            extension: "rs",
            source_stem: SOURCE_STEM,
            compile: Some(CommandTemplate {
                program: "rustc",
                args: &["-O", "-o", BINARY_PLACEHOLDER, SOURCE_PLACEHOLDER],
            }),
            run: CommandTemplate {
                program: BINARY_PLACEHOLDER,
                args: &[],
            },
            stdin_markers: &["stdin()", "read_line", "io::stdin"],
        },
        Language::Go => LanguageConfig {
            language,
            extension: "go",
            source_stem: SOURCE_STEM,
            compile: Some(CommandTemplate {
                program: "go",
                args: &["build", "-o", BINARY_PLACEHOLDER, SOURCE_PLACEHOLDER],
            }),
            run: CommandTemplate {
                program: BINARY_PLACEHOLDER,
                args: &[],
            },
            stdin_markers: &["fmt.Scan", "os.Stdin", "bufio.NewReader", "bufio.NewScanner"],
        },
        Language::Shell => LanguageConfig {
            language,
            extension: "sh",
            source_stem: SOURCE_STEM,
            // Syntax check only; the script itself is the artifact.
            compile: Some(CommandTemplate {
                program: "sh",
                args: &["-n", SOURCE_PLACEHOLDER],
            }),
            run: CommandTemplate {
                program: "sh",
                args: &[SOURCE_PLACEHOLDER],
            },
            stdin_markers: &["read "],
        },
    }
}

/// Read-only after construction.
#[derive(Clone, Debug)]
pub struct LanguageRegistry {
    configs: HashMap<Language, LanguageConfig>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new(Language::ALL.into_iter().map(default_config))
    }
}

impl LanguageRegistry {
    pub fn new(configs: impl IntoIterator<Item = LanguageConfig>) -> Self {
        Self {
            configs: configs
                .into_iter()
                .map(|config| (config.language, config))
                .collect(),
        }
    }

    pub fn resolve(&self, language: &str) -> Result<&LanguageConfig, SandboxError> {
        let parsed: Language = language.parse()?;
        self.configs
            .get(&parsed)
            .ok_or_else(|| SandboxError::UnsupportedLanguage {
                language: language.to_string(),
            })
    }

    pub fn supported_languages(&self) -> Vec<String> {
        self.configs
            .keys()
            .map(|language| language.as_str().to_string())
            .sorted()
            .collect()
    }
}

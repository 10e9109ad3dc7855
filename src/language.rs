//! Challenge Languages
//!
//! The fixed set of languages a submission may target, with the file
//! extension, toolchain invocation and failure markers for each.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::{Error, Result};

/// Supported submission languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    C,
    Lua,
}

impl Language {
    /// Every supported language, in selector order
    pub const ALL: [Language; 3] = [Language::Python, Language::C, Language::Lua];

    /// File extension used for the submitted source file
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::C => "c",
            Language::Lua => "lua",
        }
    }

    /// Identifier understood by the editor widget for syntax highlighting
    pub fn editor_id(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::C => "c",
            Language::Lua => "lua",
        }
    }

    /// Label shown on the language selector
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Python => "PYTHON",
            Language::C => "C",
            Language::Lua => "LUA",
        }
    }

    /// Starting document for the editor
    pub fn starter_code(&self) -> &'static str {
        match self {
            Language::Python => PYTHON_STARTER,
            Language::C => C_STARTER,
            Language::Lua => LUA_STARTER,
        }
    }

    /// Shell command that builds (if needed) and runs `source`
    ///
    /// `binary` is where compiled languages place their executable.
    pub fn run_command(&self, source: &str, binary: &str) -> String {
        match self {
            Language::Python => format!("python3 {}", source),
            Language::C => format!("gcc {} -o {} && {}", source, binary, binary),
            Language::Lua => format!("lua {}", source),
        }
    }

    /// Patterns that mark a failed build or run in merged serial output
    ///
    /// The serial console interleaves stdout and stderr, so these stand in
    /// for an exit status.
    pub fn failure_patterns(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &[
                r"(?m)^Traceback \(most recent call last\):",
                r"(?m)^\w*Error: ",
                r"python3: can't open file",
                r"(?m)^-?(sh|ash|bash): .*not found",
            ],
            Language::C => &[
                r"(?m):\d+:\d+: (fatal )?error: ",
                r"undefined reference to",
                r"(?m)^collect2: error:",
                r"gcc: (fatal )?error:",
                r"(?m)^-?(sh|ash|bash): .*not found",
            ],
            Language::Lua => &[
                r"(?m)^lua: ",
                r"(?m)^stack traceback:",
                r"(?m)^-?(sh|ash|bash): .*not found",
            ],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.editor_id())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" | "python3" => Ok(Language::Python),
            "c" => Ok(Language::C),
            "lua" => Ok(Language::Lua),
            _ => Err(Error::UnsupportedLanguage {
                language: s.to_string(),
            }),
        }
    }
}

/// Compiled failure patterns for one language
#[derive(Debug)]
pub struct FailureDetector {
    language: Language,
    patterns: Vec<Regex>,
}

impl FailureDetector {
    /// Compile the failure patterns for `language`
    pub fn new(language: Language) -> Self {
        let mut patterns = Vec::new();
        for pattern in language.failure_patterns() {
            match Regex::new(pattern) {
                Ok(regex) => patterns.push(regex),
                Err(e) => warn!("Failed to compile failure pattern '{}': {}", pattern, e),
            }
        }

        Self { language, patterns }
    }

    /// Language these patterns belong to
    pub fn language(&self) -> Language {
        self.language
    }

    /// First line of `output` that matches a failure pattern, if any
    pub fn first_failure<'a>(&self, output: &'a str) -> Option<&'a str> {
        let m = self
            .patterns
            .iter()
            .filter_map(|p| p.find(output))
            .min_by_key(|m| m.start())?;

        let line_start = output[..m.start()].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = output[m.start()..]
            .find('\n')
            .map(|i| m.start() + i)
            .unwrap_or(output.len());
        Some(&output[line_start..line_end])
    }

    /// Whether the output shows a failed build or run
    pub fn is_failure(&self, output: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(output))
    }
}

const PYTHON_STARTER: &str = r#"# Coding Challenge: Write code that prints "Hello, Epitech Academy!" to standard output

def main():
    # Write your code here
    # print("Hello, Epitech Academy!")
    pass

if __name__ == "__main__":
    main()"#;

const C_STARTER: &str = r#"// Coding Challenge: Write code that prints "Hello, Epitech Academy!" to standard output

#include <stdio.h>

int main() {
    // Write your code here
    // printf("Hello, Epitech Academy!\n");
    return 0;
}"#;

const LUA_STARTER: &str = r#"-- Coding Challenge: Write code that prints "Hello, Epitech Academy!" to standard output

function main()
    -- Write your code here
    -- print("Hello, Epitech Academy!")
end

main()"#;

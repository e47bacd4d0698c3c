//! Per-language source manipulation
//!
//! Each supported language gets one [`LanguageHandler`] implementation that
//! knows its package manager, its import syntax and its comment syntax. The
//! handler is picked once from a [`Language`] and used through the trait from
//! then on.

pub mod go;
pub mod java;
pub mod javascript;
pub mod python;

use crate::error::{GenError, Result};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Marker text placed above every generated test
pub const DEFAULT_TEST_COMMENT: &str = "Test generated by covgen";

pub const COMMENT_PREFIX_SLASH: &str = "//";
pub const COMMENT_PREFIX_HASH: &str = "#";

/// Supported target languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Go,
    JavaScript,
    TypeScript,
    Java,
    Python,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Go,
        Language::JavaScript,
        Language::TypeScript,
        Language::Java,
        Language::Python,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Java => "java",
            Language::Python => "python",
        }
    }

    /// Detect the language from a source file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "go" => Ok(Language::Go),
            "js" | "jsx" | "mjs" | "cjs" => Ok(Language::JavaScript),
            "ts" | "tsx" | "mts" | "cts" => Ok(Language::TypeScript),
            "java" => Ok(Language::Java),
            "py" => Ok(Language::Python),
            _ => Err(GenError::UnsupportedLanguage(path.display().to_string())),
        }
    }

    /// The handler implementing this language's capabilities
    pub fn handler(self) -> Box<dyn LanguageHandler> {
        match self {
            Language::Go => Box::new(go::GoHandler::new()),
            Language::JavaScript => Box::new(javascript::JavaScriptHandler::new()),
            Language::TypeScript => Box::new(javascript::TypeScriptHandler::new()),
            Language::Java => Box::new(java::JavaHandler::new()),
            Language::Python => Box::new(python::PythonHandler::new()),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = GenError;

    fn from_str(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "go" | "golang" => Ok(Language::Go),
            "javascript" | "js" => Ok(Language::JavaScript),
            "typescript" | "ts" => Ok(Language::TypeScript),
            "java" => Ok(Language::Java),
            "python" | "py" => Ok(Language::Python),
            other => Err(GenError::UnsupportedLanguage(other.to_string())),
        }
    }
}

/// Language-specific capabilities used by the injector.
///
/// Handlers are stateless. Anything that needs to run a process goes through
/// the injector, which owns the command runner.
pub trait LanguageHandler: Send + Sync {
    fn language(&self) -> Language;

    /// Commands that list installed dependencies, tried in order until one
    /// succeeds
    fn list_dependencies_commands(&self) -> &'static [&'static str];

    /// Turn listing output into dependency entries
    fn parse_dependencies(&self, output: &str) -> Vec<String> {
        non_empty_lines(output)
    }

    /// Canonical package name for a dependency entry or an extracted package
    /// name, used to decide whether a package is already installed
    fn normalize_dependency(&self, entry: &str) -> String {
        entry.trim().to_string()
    }

    /// Package a single install command would install, if recognizable
    fn package_name(&self, install_command: &str) -> Option<String> {
        let token = install_target(install_command)?;
        Some(self.strip_version(token).to_string())
    }

    /// Drop version pins from an install target (`pkg@1.2`, `pkg==1.2`)
    fn strip_version<'a>(&self, target: &'a str) -> &'a str {
        target
    }

    fn uninstall_command(&self, package: &str) -> String;

    /// Merge `new_imports` (one statement per entry, already trimmed) into
    /// `content`. Merging statements that are already present is a no-op.
    fn merge_imports(&self, content: &str, new_imports: &[String]) -> Result<String>;

    fn comment_prefix(&self) -> &'static str;

    /// Prefix `code` with the generated-test comment, indented like the
    /// code's first line
    fn annotate(&self, code: &str) -> String {
        let indent = code
            .lines()
            .find(|l| !l.trim().is_empty())
            .map(leading_whitespace)
            .unwrap_or("");
        format!(
            "{}{} {}\n{}",
            indent,
            self.comment_prefix(),
            DEFAULT_TEST_COMMENT,
            code
        )
    }
}

/// Trimmed, non-empty lines of command output
pub fn non_empty_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn leading_whitespace(line: &str) -> &str {
    let end = line.len() - line.trim_start().len();
    &line[..end]
}

const INSTALL_SUBCOMMANDS: [&str; 4] = ["install", "add", "get", "i"];

/// The package argument of an install command.
///
/// Looks for the first non-flag argument after an install-like subcommand
/// (`pip install`, `npm i -D`, `go get`, `yarn add`). Falls back to the third
/// whitespace-separated token.
pub(crate) fn install_target(command: &str) -> Option<&str> {
    let tokens: Vec<&str> = command
        .split_whitespace()
        .take_while(|t| !matches!(*t, "&&" | "||" | ";" | "|"))
        .collect();

    if let Some(pos) = tokens.iter().position(|t| INSTALL_SUBCOMMANDS.contains(t)) {
        if let Some(target) = tokens[pos + 1..]
            .iter()
            .copied()
            .find(|t| !t.starts_with('-'))
        {
            return Some(target);
        }
    }

    tokens.get(2).copied().filter(|t| !t.starts_with('-'))
}

use super::client::Prompt;
use crate::error::{GenError, Result};
use crate::lang::Language;
use std::fs;
use std::path::PathBuf;

pub const TEST_GENERATION_SYSTEM: &str = r#"You are a senior {language} engineer who writes focused unit tests that raise line coverage.

You are given a source file, its existing test file and a coverage report. Write NEW tests that exercise lines the existing tests miss.

RULES:
- Each test must be self-contained and fit into the existing test file as-is
- Follow the framework, naming and style already used in the test file
- Do not repeat tests that already exist
- Do not redefine helpers, fixtures or imports the test file already has
- Only use libraries that are installed, or list the install command for new ones
- Prefer a few meaningful tests over many trivial ones

OUTPUT FORMAT (YAML only, no commentary):
language: {language}
new_tests:
  - test_behavior: |
      one sentence on what the test checks
    test_name: |
      name_of_the_test
    test_code: |
      the complete test, indented as it should appear in the file
    new_imports_code: |
      one import statement per line, or "" when none are needed
    library_installation_code: |
      one install command per line, or "" when nothing must be installed"#;

pub const TEST_GENERATION_USER: &str = r#"## Source file: {source_file_name}
```{language}
{source_file}
```

## Test file: {test_file_name}
```{language}
{test_file}
```

## Installed packages
{installed_packages}

## Coverage report
```
{coverage_report}
```
{failed_tests_section}{additional_instructions_section}
Generate at most {max_tests} new tests."#;

pub const INDENTATION_SYSTEM: &str = r#"You analyze {language} test files.

Report how many spaces of indentation a new top-level test in this file needs. A test function declared at column 0 has indentation 0; a test method inside a class or describe block has the indentation of its siblings.

OUTPUT FORMAT (YAML only):
language: {language}
test_headers_indentation: <integer, or -1 if it cannot be determined>"#;

pub const INSERT_LINE_SYSTEM: &str = r#"You analyze {language} test files.

Given a test file with line numbers, report the line number after which new tests should be inserted. Usually this is the last line of the last test, inside any enclosing class or block.

OUTPUT FORMAT (YAML only):
language: {language}
relevant_line_number_to_insert_tests_after: <integer, or -1 if it cannot be determined>"#;

pub const ANALYSIS_USER: &str = r#"## Test file: {test_file_name}
```{language}
{test_file}
```"#;

const MAX_TESTS_PER_CALL: usize = 4;

/// The three prompt shapes the generator sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    TestGeneration,
    Indentation,
    InsertLine,
}

/// Assembles prompts from the current state of the source and test files.
///
/// Files are re-read on every build since accepted tests change the test
/// file between calls.
pub struct PromptBuilder {
    source_path: PathBuf,
    test_path: PathBuf,
    language: Language,
    coverage_report: String,
    installed_packages: Vec<String>,
    additional_instructions: String,
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Prefix each line with its 1-based number
pub fn number_lines(content: &str) -> String {
    content
        .split('\n')
        .enumerate()
        .map(|(i, line)| format!("{} {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text block listing earlier rejected tests and their errors
pub fn format_failed_tests<'a>(attempts: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (code, error) in attempts {
        out.push_str(&format!("Failed Test:\n\n{}\n\n", code));
        if error.is_empty() {
            out.push_str("\n\n");
        } else {
            out.push_str(&format!("Error message for test above:\n{}\n\n\n", error));
        }
    }
    out
}

impl PromptBuilder {
    pub fn new(
        source_path: impl Into<PathBuf>,
        test_path: impl Into<PathBuf>,
        language: Language,
        coverage_report: impl Into<String>,
        additional_instructions: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            test_path: test_path.into(),
            language,
            coverage_report: coverage_report.into(),
            installed_packages: Vec::new(),
            additional_instructions: additional_instructions.into(),
        }
    }

    pub fn set_coverage_report(&mut self, report: &str) {
        self.coverage_report = report.to_string();
    }

    pub fn set_installed_packages(&mut self, packages: Vec<String>) {
        self.installed_packages = packages;
    }

    fn read(path: &std::path::Path, action: &'static str) -> Result<String> {
        fs::read_to_string(path).map_err(|e| GenError::io(action, path, e))
    }

    pub fn build(&self, kind: PromptKind, failed_tests: &str) -> Result<Prompt> {
        let language = self.language.name();
        let test_file = Self::read(&self.test_path, "failed to read test file")?;

        let prompt = match kind {
            PromptKind::TestGeneration => {
                let source_file = Self::read(&self.source_path, "failed to read source file")?;
                let installed = if self.installed_packages.is_empty() {
                    "(unknown)".to_string()
                } else {
                    self.installed_packages.join("\n")
                };
                let failed_section = if failed_tests.trim().is_empty() {
                    String::new()
                } else {
                    format!(
                        "\n## Previously failed tests\nThese tests were generated before and rejected. Do not repeat them; learn from the errors.\n\n{}",
                        failed_tests
                    )
                };
                let additional_section = if self.additional_instructions.trim().is_empty() {
                    String::new()
                } else {
                    format!("\n## Additional instructions\n{}\n", self.additional_instructions.trim())
                };

                Prompt {
                    system: TEST_GENERATION_SYSTEM.replace("{language}", language),
                    user: TEST_GENERATION_USER
                        .replace("{source_file_name}", &file_name(&self.source_path))
                        .replace("{test_file_name}", &file_name(&self.test_path))
                        .replace("{installed_packages}", &installed)
                        .replace("{coverage_report}", &self.coverage_report)
                        .replace("{failed_tests_section}", &failed_section)
                        .replace("{additional_instructions_section}", &additional_section)
                        .replace("{max_tests}", &MAX_TESTS_PER_CALL.to_string())
                        .replace("{language}", language)
                        // file bodies last so their text is never treated as a placeholder
                        .replace("{source_file}", &source_file)
                        .replace("{test_file}", &number_lines(&test_file)),
                }
            }
            PromptKind::Indentation | PromptKind::InsertLine => {
                let system = match kind {
                    PromptKind::Indentation => INDENTATION_SYSTEM,
                    _ => INSERT_LINE_SYSTEM,
                };
                Prompt {
                    system: system.replace("{language}", language),
                    user: ANALYSIS_USER
                        .replace("{test_file_name}", &file_name(&self.test_path))
                        .replace("{language}", language)
                        .replace("{test_file}", &number_lines(&test_file)),
                }
            }
        };
        Ok(prompt)
    }
}

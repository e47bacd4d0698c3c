//! Per-candidate validation
//!
//! A candidate is spliced into the test file, its libraries installed and
//! imports merged, then the test command runs [`VALIDATION_RUNS`] times. It
//! is kept only when every run passes and coverage goes up. Any rejection
//! restores the test file byte for byte and removes the libraries the
//! candidate pulled in.

use crate::coverage::{CoverageProcessor, CoverageState};
use crate::cursor::Cursor;
use crate::error::{GenError, Result};
use crate::injector::{line_count, Injector};
use crate::runner::{format_duration, CommandOutput, CommandRunner};
use crate::ticker::StatusTicker;
use crate::util::tail;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// A flaky test has to fail within this many runs to be caught
pub const VALIDATION_RUNS: usize = 5;

const ERROR_CONTEXT_LINES: usize = 30;
const ERROR_MESSAGE_LIMIT: usize = 4000;

/// One generated test as proposed by the model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    pub test_name: String,
    pub test_behavior: String,
    pub test_code: String,
    pub new_imports_code: String,
    pub library_installation_code: String,
}

/// A rejected candidate and why, fed back into the next prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    pub test_code: String,
    pub error_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    FailedBuild,
    NoCoverageGain,
}

/// Re-indent `code` so its first non-blank line starts at `target` spaces.
///
/// Blank lines at either end are dropped. Lines keep their indentation
/// relative to the first one; a negative shift never removes more spaces
/// than a line has.
pub fn normalize_indentation(code: &str, target: usize) -> String {
    let lines: Vec<&str> = code.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    let Some(first) = lines.iter().position(|l| !l.trim().is_empty()) else {
        return String::new();
    };
    let last = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .unwrap_or(first);
    let lines = &lines[first..=last];

    let initial = lines[0].len() - lines[0].trim_start_matches(' ').len();
    if initial == target {
        return lines.join("\n");
    }

    lines
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else if target > initial {
                format!("{}{}", " ".repeat(target - initial), line)
            } else {
                let have = line.len() - line.trim_start_matches(' ').len();
                line[have.min(initial - target)..].to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pull the useful part out of test output: lines that look like failures,
/// or the tail of the output when none do
pub fn extract_error_message(output: &str) -> String {
    const MARKERS: [&str; 7] = [
        "error", "fail", "panic", "exception", "assert", "expected", "traceback",
    ];
    let flagged: Vec<&str> = output
        .lines()
        .filter(|line| {
            let lower = line.to_ascii_lowercase();
            MARKERS.iter().any(|m| lower.contains(m))
        })
        .collect();

    let message = if flagged.is_empty() {
        tail(output, ERROR_CONTEXT_LINES)
    } else {
        flagged
            .iter()
            .take(ERROR_CONTEXT_LINES)
            .copied()
            .collect::<Vec<_>>()
            .join("\n")
    };
    crate::util::truncate(message.trim(), ERROR_MESSAGE_LIMIT)
}

pub struct Validator {
    test_path: PathBuf,
    test_command: String,
    working_dir: Option<PathBuf>,
    /// File name the coverage report is filtered on
    target_file: Option<String>,
    injector: Injector,
    runner: Arc<dyn CommandRunner>,
    coverage: Arc<dyn CoverageProcessor>,
}

impl Validator {
    pub fn new(
        test_path: impl Into<PathBuf>,
        test_command: impl Into<String>,
        working_dir: Option<PathBuf>,
        target_file: Option<String>,
        injector: Injector,
        runner: Arc<dyn CommandRunner>,
        coverage: Arc<dyn CoverageProcessor>,
    ) -> Self {
        Self {
            test_path: test_path.into(),
            test_command: test_command.into(),
            working_dir,
            target_file,
            injector,
            runner,
            coverage,
        }
    }

    pub fn injector(&self) -> &Injector {
        &self.injector
    }

    fn read_test_file(&self) -> Result<String> {
        fs::read_to_string(&self.test_path)
            .map_err(|e| GenError::io("failed to read test file", &self.test_path, e))
    }

    fn write_test_file(&self, content: &str) -> Result<()> {
        fs::write(&self.test_path, content)
            .map_err(|e| GenError::io("failed to write test file", &self.test_path, e))
    }

    /// Put the file back and remove libraries this candidate installed
    fn rollback(&self, snapshot: &str, installed: &[String]) -> Result<()> {
        self.write_test_file(snapshot)?;
        self.injector.uninstall_libraries(installed);
        Ok(())
    }

    /// Run the test command once with the progress ticker up
    pub fn run_tests(&self) -> Result<CommandOutput> {
        let ticker = StatusTicker::start();
        let result = self
            .runner
            .run(&self.test_command, self.working_dir.as_deref());
        ticker.stop();
        result
    }

    /// Validate one candidate. The return value says whether it was kept;
    /// `Err` means the pipeline itself broke.
    pub fn validate(
        &self,
        candidate: &Candidate,
        cursor: &mut Cursor,
        coverage: &mut CoverageState,
        installed_deps: &[String],
        failed_attempts: &mut Vec<FailedAttempt>,
    ) -> Result<Outcome> {
        let code = normalize_indentation(&candidate.test_code, cursor.indentation);
        let annotated = self.injector.annotate(&code);

        let snapshot = self.read_test_file()?;
        let mut lines: Vec<&str> = snapshot.split('\n').collect();
        let insert_at = cursor.insertion_point(lines.len());
        let block: Vec<&str> = std::iter::once("")
            .chain(annotated.split('\n'))
            .chain(std::iter::once(""))
            .collect();
        let inserted = block.len();
        lines.splice(insert_at..insert_at, block);
        self.write_test_file(&lines.join("\n"))?;

        let new_libraries = match self
            .injector
            .install_libraries(&candidate.library_installation_code, installed_deps)
        {
            Ok(libraries) => libraries,
            Err(err) => {
                tracing::info!(error = %err, "library installation failed, discarding test");
                self.rollback(&snapshot, &err.installed)?;
                failed_attempts.push(FailedAttempt {
                    test_code: candidate.test_code.clone(),
                    error_message: err.to_string(),
                });
                return Ok(Outcome::FailedBuild);
            }
        };

        let import_delta = match self
            .injector
            .update_imports(&self.test_path, &candidate.new_imports_code)
        {
            Ok(delta) => delta,
            Err(err) => {
                tracing::warn!(error = %err, "failed to update imports");
                0
            }
        };

        tracing::info!(
            command = %self.test_command,
            runs = VALIDATION_RUNS,
            "running test repeatedly for validation"
        );
        let mut last_run: Option<CommandOutput> = None;
        for run in 1..=VALIDATION_RUNS {
            tracing::info!(run, "validation run");
            let output = match self.run_tests() {
                Ok(output) => output,
                Err(err) => {
                    self.rollback(&snapshot, &new_libraries)?;
                    return Err(err);
                }
            };
            if !output.success() {
                tracing::info!(
                    run,
                    exit_code = output.exit_code,
                    "test failed, discarding generated test"
                );
                self.rollback(&snapshot, &new_libraries)?;
                failed_attempts.push(FailedAttempt {
                    test_code: candidate.test_code.clone(),
                    error_message: extract_error_message(&output.combined()),
                });
                return Ok(Outcome::FailedBuild);
            }
            tracing::debug!(run, took = %format_duration(output.duration), "validation run passed");
            last_run = Some(output);
        }

        let since = match &last_run {
            Some(output) => output.started_at(),
            None => chrono::Utc::now(),
        };
        let report = match self.coverage.process(self.target_file.as_deref(), since) {
            Ok(report) => report,
            Err(err) => {
                self.rollback(&snapshot, &new_libraries)?;
                return Err(err);
            }
        };

        if report.coverage <= coverage.current {
            tracing::info!(
                before = coverage.current,
                after = report.coverage,
                "generated test did not increase coverage, discarding"
            );
            self.rollback(&snapshot, &new_libraries)?;
            return Ok(Outcome::NoCoverageGain);
        }

        tracing::info!(
            before = coverage.current,
            after = report.coverage,
            "generated test passed and increased coverage"
        );
        coverage.current = report.coverage;
        coverage.report_content = report.content;

        let new_count = line_count(&self.read_test_file()?);
        cursor.line = insert_at;
        cursor.advance(inserted, import_delta, new_count);
        Ok(Outcome::Passed)
    }
}

//! Generation loop
//!
//! For each source file: measure coverage, resolve where tests go, then ask
//! the model for tests and validate them one at a time until the coverage
//! goal or the iteration limit is reached. Without a configured source file
//! the files are discovered from a whole-project coverage run.

use crate::config::GenConfig;
use crate::coverage::{CoverageProcessor, CoverageState, ReportFormat};
use crate::cursor::{self, Cursor};
use crate::error::{GenError, Result};
use crate::injector::Injector;
use crate::lang::Language;
use crate::llm::parse::parse_candidates;
use crate::llm::prompts::format_failed_tests;
use crate::llm::{ModelClient, PromptBuilder, PromptKind, MAX_TOKENS};
use crate::paths;
use crate::report;
use crate::runner::{format_duration, CommandRunner};
use crate::ticker::StatusTicker;
use crate::util::tail;
use crate::validate::{FailedAttempt, Outcome, Validator};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Outcome counts. Every `record` bumps `total` and exactly one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub total: u32,
    pub passed: u32,
    pub failed_build: u32,
    pub no_coverage_gain: u32,
}

impl Tally {
    pub fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Passed => self.passed += 1,
            Outcome::FailedBuild => self.failed_build += 1,
            Outcome::NoCoverageGain => self.no_coverage_gain += 1,
        }
    }

    pub fn discarded(&self) -> u32 {
        self.failed_build + self.no_coverage_gain
    }
}

/// Counts for the whole run
pub type SessionCounters = Tally;
/// Counts for one model call's worth of candidates
pub type IterationTally = Tally;

/// A source file lined up for generation
#[derive(Debug, Clone)]
struct FileJob {
    source: PathBuf,
    test: PathBuf,
    language: Language,
    /// The test file was created by us or had no content
    new_test_file: bool,
}

pub struct Generator {
    config: GenConfig,
    model: Arc<dyn ModelClient>,
    runner: Arc<dyn CommandRunner>,
    coverage: Arc<dyn CoverageProcessor>,
    counters: SessionCounters,
}

/// Run test commands off the async scheduler. A current-thread runtime has no
/// other worker to hand tasks to, so the closure runs inline there.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

impl Generator {
    pub fn new(
        config: GenConfig,
        model: Arc<dyn ModelClient>,
        runner: Arc<dyn CommandRunner>,
        coverage: Arc<dyn CoverageProcessor>,
    ) -> Self {
        Self {
            config,
            model,
            runner,
            coverage,
            counters: SessionCounters::default(),
        }
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    fn working_dir(&self) -> Option<&Path> {
        self.config.test_dir.as_deref()
    }

    fn new_state(&self, format: ReportFormat) -> CoverageState {
        CoverageState::new(
            self.config.coverage_report_path.clone(),
            format,
            self.config.desired_coverage,
        )
    }

    /// Run generation for the configured file, or for every discovered one
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(GenError::Cancelled);
        }
        let format = self.config.report_format()?;
        let language = self.config.language_override()?;

        let jobs = match self.config.source_file_path.clone() {
            Some(source) => {
                let language = match language {
                    Some(language) => language,
                    None => Language::from_path(&source)?,
                };
                vec![self.prepare(source, self.config.test_file_path.clone(), language)?]
            }
            None => self.discover(format, language, cancel)?,
        };

        let mut result = Ok(());
        for job in &jobs {
            if let Err(err) = self.generate_for_file(job, format, cancel).await {
                result = Err(err);
                break;
            }
        }
        report::print_session_summary(&self.counters);
        result
    }

    /// Derive (unless given) and create the test file for `source`
    fn prepare(&self, source: PathBuf, test: Option<PathBuf>, language: Language) -> Result<FileJob> {
        let test = match test {
            Some(test) => test,
            None => paths::test_file_path(&source, language, self.config.test_dir.as_deref())?,
        };
        let created = paths::create_test_file(&test, &source, language)?;
        let new_test_file = created || paths::is_file_empty(&test)?;
        Ok(FileJob {
            source,
            test,
            language,
            new_test_file,
        })
    }

    /// Collect source files from a coverage run over the whole project
    fn discover(
        &self,
        format: ReportFormat,
        language: Option<Language>,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileJob>> {
        tracing::info!("no source file given, discovering files from coverage report");
        let mut state = self.new_state(format);
        self.measure(None, &mut state, cancel)?;

        let base = self.base_dir();
        let mut jobs = Vec::new();
        for reported in &state.discovered_files {
            let Some(source) = paths::resolve_report_path(reported, base.as_deref()) else {
                tracing::warn!(file = %reported, "file from coverage report not found, skipping");
                continue;
            };
            if paths::is_test_file(&source, base.as_deref()) {
                tracing::debug!(file = %source.display(), "skipping test file");
                continue;
            }
            let file_language = match language.map_or_else(|| Language::from_path(&source), Ok) {
                Ok(language) => language,
                Err(err) => {
                    tracing::info!(file = %source.display(), error = %err, "skipping file");
                    continue;
                }
            };
            match self.prepare(source.clone(), None, file_language) {
                Ok(job) => jobs.push(job),
                Err(err) => {
                    tracing::warn!(file = %source.display(), error = %err, "could not set up test file, skipping");
                }
            }
        }

        if jobs.is_empty() {
            return Err(GenError::NoSourceFiles);
        }
        tracing::info!(files = jobs.len(), "discovered source files");
        Ok(jobs)
    }

    /// `test_dir`, else the current directory
    fn base_dir(&self) -> Option<PathBuf> {
        self.working_dir()
            .map(Path::to_path_buf)
            .or_else(|| std::env::current_dir().ok())
    }

    /// Name the coverage report is filtered on
    fn target_name(&self, source: &Path) -> String {
        let base = self.base_dir();
        let relative = base
            .as_deref()
            .and_then(|base| source.strip_prefix(base).ok())
            .unwrap_or(source);
        relative
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string()
    }

    /// Run the test command and read the report it writes
    fn measure(
        &self,
        target: Option<&str>,
        state: &mut CoverageState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(GenError::Cancelled);
        }
        tracing::info!(command = %self.config.test_command, "running tests to measure coverage");
        let ticker = StatusTicker::start();
        let result = blocking(|| self.runner.run(&self.config.test_command, self.working_dir()));
        ticker.stop();
        let output = result?;

        if !output.success() {
            tracing::warn!(
                exit_code = output.exit_code,
                output = %tail(&output.combined(), 20),
                "test command failed while measuring coverage"
            );
        }
        tracing::debug!(took = %format_duration(output.duration), "coverage run finished");

        let report = self.coverage.process(target, output.started_at())?;
        state.apply(report);
        tracing::info!(coverage = state.current_percent(), "measured coverage");
        Ok(())
    }

    fn installed_dependencies(injector: &Injector) -> Vec<String> {
        injector.installed_dependencies().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "continuing without installed dependency list");
            Vec::new()
        })
    }

    async fn generate_for_file(
        &mut self,
        job: &FileJob,
        format: ReportFormat,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let span = tracing::info_span!("file", source = %job.source.display(), language = %job.language);
        self.generate_in_span(job, format, cancel).instrument(span).await
    }

    async fn generate_in_span(
        &mut self,
        job: &FileJob,
        format: ReportFormat,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let source_display = job.source.display().to_string();
        let target = self.target_name(&job.source);
        tracing::info!(test_file = %job.test.display(), new = job.new_test_file, "generating tests");

        let mut state = self.new_state(format);
        if !job.new_test_file {
            self.measure(Some(&target), &mut state, cancel)?;
        }

        let mut prompts = PromptBuilder::new(
            &job.source,
            &job.test,
            job.language,
            state.report_content.clone(),
            self.config.additional_prompt.clone(),
        );

        let mut cursor = if paths::is_file_empty(&job.test)? {
            Cursor::default()
        } else {
            cursor::resolve(self.model.as_ref(), &prompts, cancel).await?
        };
        tracing::debug!(line = cursor.line, indentation = cursor.indentation, "insertion point");

        let working_dir = self.config.test_dir.clone();
        let validator = Validator::new(
            &job.test,
            self.config.test_command.clone(),
            working_dir.clone(),
            Some(target.clone()),
            Injector::new(job.language, self.runner.clone(), working_dir),
            self.runner.clone(),
            self.coverage.clone(),
        );

        let mut iterations = 0u32;
        let mut failed_attempts: Vec<FailedAttempt> = Vec::new();

        while !state.goal_reached() && iterations < self.config.max_iterations {
            if cancel.is_cancelled() {
                return Err(GenError::Cancelled);
            }
            report::print_progress(state.current_percent(), state.desired_percent, &source_display);

            let installed = blocking(|| Self::installed_dependencies(validator.injector()));
            prompts.set_installed_packages(installed);
            prompts.set_coverage_report(&state.report_content);
            let history = format_failed_tests(
                failed_attempts
                    .iter()
                    .map(|f| (f.test_code.as_str(), f.error_message.as_str())),
            );
            failed_attempts.clear();
            let prompt = prompts.build(PromptKind::TestGeneration, &history)?;

            tracing::info!(model = self.model.model(), iteration = iterations + 1, "generating tests");
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(GenError::Cancelled),
                response = self.model.call(&prompt, MAX_TOKENS) => response?,
            };
            tracing::info!(
                prompt_tokens = response.prompt_tokens,
                completion_tokens = response.completion_tokens,
                total_tokens = response.total_tokens(),
                "model response received"
            );
            let candidates = parse_candidates(&response.content)?;
            tracing::info!(count = candidates.len(), "validating generated tests");

            let mut tally = IterationTally::default();
            for candidate in &candidates {
                if cancel.is_cancelled() {
                    return Err(GenError::Cancelled);
                }
                tracing::debug!(test = %candidate.test_name, behavior = %candidate.test_behavior, "validating");
                let installed = blocking(|| Self::installed_dependencies(validator.injector()));
                let outcome = blocking(|| {
                    validator.validate(
                        candidate,
                        &mut cursor,
                        &mut state,
                        &installed,
                        &mut failed_attempts,
                    )
                })?;
                tally.record(outcome);
                self.counters.record(outcome);
            }

            iterations += 1;
            if !state.goal_reached() && state.current > 0.0 {
                self.measure(Some(&target), &mut state, cancel)?;
            }
            report::print_iteration_summary(&tally);
        }

        if job.new_test_file && state.current == 0.0 {
            tracing::info!(path = %job.test.display(), "no coverage gained, removing new test file");
            fs::remove_file(&job.test)
                .map_err(|e| GenError::io("failed to remove test file", &job.test, e))?;
        }

        if state.goal_reached() {
            report::print_target_reached(
                &source_display,
                state.desired_percent,
                state.current_percent(),
                iterations,
            );
        } else {
            report::print_iteration_limit(&source_display, state.current_percent());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeCoverage, FakeModel, ScriptedRunner};

    const TEST_CMD: &str = "pytest --cov";
    const SOURCE: &str = "def add(a, b):\n    return a + b\n\ndef sub(a, b):\n    return a - b\n";
    const EXISTING_TESTS: &str = "import pytest\n\ndef test_add():\n    assert 1 + 1 == 2\n";

    const ONE_TEST: &str = r#"```yaml
new_tests:
  - test_name: test_sub
    test_behavior: subtracts two numbers
    test_code: |
      def test_sub():
          assert sub(2, 1) == 1
    new_imports_code: "from calc import sub"
    library_installation_code: ""
```"#;

    const THREE_TESTS: &str = r#"new_tests:
  - test_name: test_a
    test_code: |
      def test_a():
          assert sub(3, 1) == 2
  - test_name: test_b
    test_code: |
      def test_b():
          assert sub(1, 1) == 0
  - test_name: test_c
    test_code: |
      def test_c():
          assert sub(0, 1) == -1
"#;

    struct Project {
        tmp: tempfile::TempDir,
        source: PathBuf,
        test: PathBuf,
    }

    fn project(test_content: Option<&str>) -> Project {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("calc.py");
        let test = tmp.path().join("test_calc.py");
        fs::write(&source, SOURCE).unwrap();
        if let Some(content) = test_content {
            fs::write(&test, content).unwrap();
        }
        Project { tmp, source, test }
    }

    fn config(project: &Project, max_iterations: u32) -> GenConfig {
        GenConfig {
            source_file_path: Some(project.source.clone()),
            test_file_path: Some(project.test.clone()),
            test_command: TEST_CMD.to_string(),
            coverage_format: "cobertura".to_string(),
            max_iterations,
            ..Default::default()
        }
    }

    fn generator(
        config: GenConfig,
        model: &Arc<FakeModel>,
        runner: &Arc<ScriptedRunner>,
        coverage: &Arc<FakeCoverage>,
    ) -> Generator {
        Generator::new(config, model.clone(), runner.clone(), coverage.clone())
    }

    #[test]
    fn test_tally_conserves_counts() {
        let mut tally = Tally::default();
        for outcome in [
            Outcome::Passed,
            Outcome::FailedBuild,
            Outcome::NoCoverageGain,
            Outcome::FailedBuild,
        ] {
            tally.record(outcome);
            assert_eq!(tally.passed + tally.failed_build + tally.no_coverage_gain, tally.total);
        }
        assert_eq!(tally.discarded(), 3);
    }

    #[tokio::test]
    async fn test_clean_accept_reaches_goal_in_one_iteration() {
        let p = project(Some(EXISTING_TESTS));
        let model = Arc::new(FakeModel::new(&[
            "test_headers_indentation: 0",
            "relevant_line_number_to_insert_tests_after: 4",
            ONE_TEST,
        ]));
        let runner = Arc::new(ScriptedRunner::default());
        let coverage = Arc::new(FakeCoverage::new(&[0.60, 0.85]));
        let mut subject = generator(config(&p, 5), &model, &runner, &coverage);

        subject.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            *subject.counters(),
            Tally {
                total: 1,
                passed: 1,
                failed_build: 0,
                no_coverage_gain: 0
            }
        );
        assert_eq!(model.calls(), 3);
        // baseline plus the validated candidate, no re-measure after the goal
        assert_eq!(coverage.calls(), 2);
        let content = fs::read_to_string(&p.test).unwrap();
        assert!(content.starts_with("from calc import sub\n"));
        assert!(content.contains("def test_sub():"));
    }

    #[tokio::test]
    async fn test_empty_test_file_skips_cursor_and_is_removed_without_gain() {
        let p = project(Some(""));
        let model = Arc::new(FakeModel::always(ONE_TEST));
        let runner = Arc::new(ScriptedRunner::default());
        let coverage = Arc::new(FakeCoverage::new(&[0.0]));
        let mut subject = generator(config(&p, 1), &model, &runner, &coverage);

        subject.run(&CancellationToken::new()).await.unwrap();

        // one generation call, no indentation or insert-line questions
        assert_eq!(model.calls(), 1);
        assert!(!model.prompts()[0].system.contains("test_headers_indentation"));
        // no baseline run for a new test file
        assert_eq!(coverage.calls(), 1);
        assert_eq!(subject.counters().no_coverage_gain, 1);
        assert!(!p.test.exists());
    }

    #[tokio::test]
    async fn test_mixed_outcomes_are_all_counted() {
        let p = project(Some(EXISTING_TESTS));
        let model = Arc::new(FakeModel::new(&[
            "test_headers_indentation: 0",
            "relevant_line_number_to_insert_tests_after: 4",
            THREE_TESTS,
        ]));
        // baseline passes, first candidate fails on its first run
        let runner = Arc::new(ScriptedRunner::default().sequence(TEST_CMD, &[0, 1]));
        // baseline, no gain for the second candidate, gain for the third
        let coverage = Arc::new(FakeCoverage::new(&[0.50, 0.50, 0.60]));
        let mut subject = generator(config(&p, 1), &model, &runner, &coverage);

        subject.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            *subject.counters(),
            Tally {
                total: 3,
                passed: 1,
                failed_build: 1,
                no_coverage_gain: 1
            }
        );
        // still short of the goal and nonzero, so a final re-measure
        assert_eq!(coverage.calls(), 4);
        let content = fs::read_to_string(&p.test).unwrap();
        assert!(content.contains("def test_c():"));
        assert!(!content.contains("def test_a():"));
        assert!(!content.contains("def test_b():"));
    }

    #[tokio::test]
    async fn test_failure_history_reaches_next_prompt() {
        let p = project(Some(EXISTING_TESTS));
        let model = Arc::new(FakeModel::new(&[
            "test_headers_indentation: 0",
            "relevant_line_number_to_insert_tests_after: 4",
            ONE_TEST,
            ONE_TEST,
        ]));
        let runner = Arc::new(ScriptedRunner::default().sequence(TEST_CMD, &[0, 1]));
        let coverage = Arc::new(FakeCoverage::new(&[0.50]));
        let mut subject = generator(config(&p, 2), &model, &runner, &coverage);

        subject.run(&CancellationToken::new()).await.unwrap();

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 4);
        assert!(!prompts[2].user.contains("Failed Test:"));
        assert!(prompts[3].user.contains("Failed Test:"));
        assert!(prompts[3].user.contains("AssertionError"));
    }

    #[tokio::test]
    async fn test_discovery_without_files_is_an_error() {
        let p = project(None);
        let mut cfg = config(&p, 1);
        cfg.source_file_path = None;
        cfg.test_file_path = None;
        let model = Arc::new(FakeModel::always(ONE_TEST));
        let runner = Arc::new(ScriptedRunner::default());
        let coverage = Arc::new(FakeCoverage::new(&[0.5]).with_files(&["tests/test_calc.py"]));
        let mut subject = generator(cfg, &model, &runner, &coverage);

        let err = subject.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, GenError::NoSourceFiles));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_discovery_creates_test_file_and_generates() {
        let p = project(None);
        let mut cfg = config(&p, 3);
        cfg.source_file_path = None;
        cfg.test_file_path = None;
        let source = p.source.to_string_lossy().to_string();
        let skipped = p.tmp.path().join("test_other.py").to_string_lossy().to_string();
        let model = Arc::new(FakeModel::always(ONE_TEST));
        let runner = Arc::new(ScriptedRunner::default());
        let coverage = Arc::new(FakeCoverage::new(&[0.40, 0.90]).with_files(&[source.as_str(), skipped.as_str()]));
        let mut subject = generator(cfg, &model, &runner, &coverage);

        subject.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(subject.counters().passed, 1);
        assert_eq!(model.calls(), 1);
        assert!(fs::read_to_string(&p.test).unwrap().contains("def test_sub():"));
        assert!(!p.tmp.path().join("test_test_other.py").exists());
    }

    const GO_TEST: &str = r#"new_tests:
  - test_name: TestSub
    test_code: |
      func TestSub(t *testing.T) {
          if Sub(2, 1) != 1 {
              t.Fatal("sub")
          }
      }
    new_imports_code: "\"testing\""
    library_installation_code: ""
"#;

    #[tokio::test]
    async fn test_discovery_maps_go_import_paths_to_module_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(tmp.path().join("go.mod"), "module example.com/calc\n\ngo 1.22\n").unwrap();
        fs::write(
            tmp.path().join("calc.go"),
            "package calc\n\nfunc Sub(a, b int) int { return a - b }\n",
        )
        .unwrap();
        let cfg = GenConfig {
            test_command: "go test -coverprofile=coverage.out ./...".to_string(),
            test_dir: Some(tmp.path().to_path_buf()),
            coverage_format: "go".to_string(),
            max_iterations: 2,
            ..Default::default()
        };
        let model = Arc::new(FakeModel::new(&[
            "test_headers_indentation: 0",
            "relevant_line_number_to_insert_tests_after: 1",
            GO_TEST,
        ]));
        let runner = Arc::new(ScriptedRunner::default());
        let coverage = Arc::new(
            FakeCoverage::new(&[0.40, 0.90])
                .with_files(&["example.com/calc/calc.go", "example.com/calc/gone.go"]),
        );
        let mut subject = generator(cfg, &model, &runner, &coverage);

        subject.run(&CancellationToken::new()).await.unwrap();

        let test = tmp.path().join("calc_test.go");
        let content = fs::read_to_string(&test).unwrap();
        assert!(content.starts_with("package calc\n"));
        assert!(content.contains("\"testing\""));
        assert!(content.contains("func TestSub(t *testing.T) {"));
        assert_eq!(subject.counters().passed, 1);
        assert!(!tmp.path().join("example.com").exists());
        assert!(!tmp.path().join("gone_test.go").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_generation_on_multi_thread_runtime() {
        let p = project(Some(EXISTING_TESTS));
        let model = Arc::new(FakeModel::new(&[
            "test_headers_indentation: 0",
            "relevant_line_number_to_insert_tests_after: 4",
            ONE_TEST,
        ]));
        let runner = Arc::new(ScriptedRunner::default());
        let coverage = Arc::new(FakeCoverage::new(&[0.60, 0.85]));
        let mut subject = generator(config(&p, 5), &model, &runner, &coverage);

        subject.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(subject.counters().passed, 1);
        // baseline plus the validation runs of the accepted candidate
        assert_eq!(runner.count(TEST_CMD), 1 + crate::validate::VALIDATION_RUNS);
        assert!(fs::read_to_string(&p.test).unwrap().contains("def test_sub():"));
    }

    #[test]
    fn test_blocking_runs_inline_without_runtime() {
        let mut ran = false;
        let value = blocking(|| {
            ran = true;
            7
        });
        assert_eq!(value, 7);
        assert!(ran);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let p = project(Some(EXISTING_TESTS));
        let model = Arc::new(FakeModel::always(ONE_TEST));
        let runner = Arc::new(ScriptedRunner::default());
        let coverage = Arc::new(FakeCoverage::new(&[0.5]));
        let mut subject = generator(config(&p, 3), &model, &runner, &coverage);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = subject.run(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(model.calls(), 0);
        assert!(runner.calls().is_empty());
        assert_eq!(fs::read_to_string(&p.test).unwrap(), EXISTING_TESTS);
    }
}

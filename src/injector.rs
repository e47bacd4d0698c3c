//! Language-independent front for dependency and import manipulation
//!
//! The injector binds one [`LanguageHandler`] to a command runner and a
//! working directory. It is built once per source file; after that no code
//! path looks at the language tag again.

use crate::error::{GenError, InstallError, Result};
use crate::lang::{Language, LanguageHandler};
use crate::runner::CommandRunner;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct Injector {
    handler: Box<dyn LanguageHandler>,
    runner: Arc<dyn CommandRunner>,
    working_dir: Option<PathBuf>,
}

impl Injector {
    pub fn new(language: Language, runner: Arc<dyn CommandRunner>, working_dir: Option<PathBuf>) -> Self {
        Self {
            handler: language.handler(),
            runner,
            working_dir,
        }
    }

    /// Build from a language tag such as `"python"`; unknown tags fail fast
    pub fn from_tag(tag: &str, runner: Arc<dyn CommandRunner>, working_dir: Option<PathBuf>) -> Result<Self> {
        let language: Language = tag.parse()?;
        Ok(Self::new(language, runner, working_dir))
    }

    pub fn language(&self) -> Language {
        self.handler.language()
    }

    fn dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Ask the package manager what is installed
    pub fn installed_dependencies(&self) -> Result<Vec<String>> {
        let mut last_error = String::from("no listing command");
        for command in self.handler.list_dependencies_commands() {
            match self.runner.run(command, self.dir()) {
                Ok(out) if out.success() => return Ok(self.handler.parse_dependencies(&out.stdout)),
                Ok(out) => {
                    tracing::debug!(command, exit_code = out.exit_code, "dependency listing failed");
                    last_error = format!("'{}' exited with {}: {}", command, out.exit_code, out.stderr.trim());
                }
                Err(err) => {
                    tracing::debug!(command, error = %err, "dependency listing failed");
                    last_error = err.to_string();
                }
            }
        }
        Err(GenError::Dependencies(last_error))
    }

    fn is_installed(&self, installed: &[String], package: &str) -> bool {
        let wanted = self.handler.normalize_dependency(package);
        installed
            .iter()
            .any(|entry| self.handler.normalize_dependency(entry) == wanted)
    }

    /// Run each line of `install_code` as an install command.
    ///
    /// Packages already in `installed` are skipped. Returns the packages this
    /// call installed, which are exactly the ones a rollback must remove.
    pub fn install_libraries(
        &self,
        install_code: &str,
        installed: &[String],
    ) -> std::result::Result<Vec<String>, InstallError> {
        let mut known: Vec<String> = installed.to_vec();
        let mut newly_installed = Vec::new();

        let install_code = install_code.trim();
        if install_code.is_empty() || install_code == "\"\"" {
            return Ok(newly_installed);
        }

        for command in install_code.lines().map(str::trim).filter(|c| !c.is_empty()) {
            let package = self.handler.package_name(command).unwrap_or_default();
            if !package.is_empty() && self.is_installed(&known, &package) {
                tracing::debug!(package, "library already installed");
                continue;
            }

            tracing::info!(command, "installing library");
            let failure = match self.runner.run(command, self.dir()) {
                Ok(out) if out.success() => None,
                Ok(out) => Some(format!("exit code {}: {}", out.exit_code, out.combined().trim())),
                Err(err) => Some(err.to_string()),
            };
            if let Some(reason) = failure {
                return Err(InstallError {
                    command: command.to_string(),
                    reason,
                    installed: newly_installed,
                });
            }

            if !package.is_empty() {
                known.push(package.clone());
                newly_installed.push(package);
            }
        }
        Ok(newly_installed)
    }

    /// Best-effort removal; failures are logged and skipped
    pub fn uninstall_libraries(&self, packages: &[String]) {
        for package in packages {
            let command = self.handler.uninstall_command(package);
            tracing::info!(package, command, "uninstalling library");
            match self.runner.run(&command, self.dir()) {
                Ok(out) if out.success() => {}
                Ok(out) => tracing::warn!(
                    command,
                    exit_code = out.exit_code,
                    "failed to uninstall library"
                ),
                Err(err) => tracing::warn!(command, error = %err, "failed to uninstall library"),
            }
        }
    }

    /// Merge import statements into `content`, returning the new content and
    /// how many lines it gained (negative when statements were folded)
    pub fn merge_imports(&self, content: &str, imports_code: &str) -> Result<(String, isize)> {
        let new_imports: Vec<String> = imports_code
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && *l != "\"\"")
            .map(str::to_string)
            .collect();
        if new_imports.is_empty() {
            return Ok((content.to_string(), 0));
        }

        let merged = self.handler.merge_imports(content, &new_imports)?;
        let delta = line_count(&merged) as isize - line_count(content) as isize;
        Ok((merged, delta))
    }

    /// Merge imports into the file at `path` in place
    pub fn update_imports(&self, path: &Path, imports_code: &str) -> Result<isize> {
        let content = fs::read_to_string(path)
            .map_err(|e| GenError::io("failed to read test file", path, e))?;
        let (merged, delta) = self.merge_imports(&content, imports_code)?;
        if merged != content {
            fs::write(path, merged).map_err(|e| GenError::io("failed to write test file", path, e))?;
        }
        Ok(delta)
    }

    pub fn annotate(&self, code: &str) -> String {
        self.handler.annotate(code)
    }
}

/// Number of `\n`-separated lines, matching how the test file is spliced
pub fn line_count(content: &str) -> usize {
    content.split('\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use pretty_assertions::assert_eq;

    fn injector(language: Language, runner: ScriptedRunner) -> (Injector, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        (Injector::new(language, runner.clone(), None), runner)
    }

    #[test]
    fn test_from_tag_rejects_unknown_language() {
        let runner: Arc<dyn CommandRunner> = Arc::new(ScriptedRunner::default());
        assert!(matches!(
            Injector::from_tag("haskell", runner.clone(), None),
            Err(GenError::UnsupportedLanguage(_))
        ));
        assert_eq!(
            Injector::from_tag("Python", runner, None).unwrap().language(),
            Language::Python
        );
    }

    #[test]
    fn test_python_listing_falls_back_to_pip3() {
        let (inj, runner) = injector(
            Language::Python,
            ScriptedRunner::default()
                .respond("pip freeze", 127, "")
                .respond("pip3 freeze", 0, "pytest==8.0.0\nrequests==2.31.0\n"),
        );
        let deps = inj.installed_dependencies().unwrap();
        assert_eq!(deps, vec!["pytest==8.0.0", "requests==2.31.0"]);
        assert_eq!(runner.calls(), vec!["pip freeze", "pip3 freeze"]);
    }

    #[test]
    fn test_listing_failure_is_surfaced() {
        let (inj, _) = injector(Language::Go, ScriptedRunner::default().respond("go list", 1, ""));
        assert!(matches!(inj.installed_dependencies(), Err(GenError::Dependencies(_))));
    }

    #[test]
    fn test_install_skips_present_and_records_new() {
        let (inj, runner) = injector(Language::Python, ScriptedRunner::default());
        let installed = vec!["Requests==2.31.0".to_string()];
        let new = inj
            .install_libraries("pip install requests\npip install pytest-mock\n", &installed)
            .unwrap();
        assert_eq!(new, vec!["pytest-mock"]);
        assert_eq!(runner.calls(), vec!["pip install pytest-mock"]);
    }

    #[test]
    fn test_install_failure_reports_partial_progress() {
        let (inj, _) = injector(
            Language::JavaScript,
            ScriptedRunner::default().respond("npm install nock", 1, "E404"),
        );
        let err = inj
            .install_libraries("npm install supertest\nnpm install nock", &[])
            .unwrap_err();
        assert_eq!(err.command, "npm install nock");
        assert_eq!(err.installed, vec!["supertest"]);
    }

    #[test]
    fn test_empty_install_code_is_noop() {
        let (inj, runner) = injector(Language::Go, ScriptedRunner::default());
        assert!(inj.install_libraries("\"\"", &[]).unwrap().is_empty());
        assert!(inj.install_libraries("  \n", &[]).unwrap().is_empty());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_uninstall_is_best_effort() {
        let (inj, runner) = injector(
            Language::JavaScript,
            ScriptedRunner::default().respond("npm uninstall a", 1, ""),
        );
        inj.uninstall_libraries(&["a".to_string(), "b".to_string()]);
        assert_eq!(runner.calls(), vec!["npm uninstall a", "npm uninstall b"]);
    }

    #[test]
    fn test_update_imports_reports_line_delta() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("calc_test.go");
        fs::write(&path, "package calc\n\nfunc TestA(t *testing.T) {}\n").unwrap();
        let (inj, _) = injector(Language::Go, ScriptedRunner::default());

        let delta = inj.update_imports(&path, "\"testing\"\n\"fmt\"\n").unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "package calc\n\nimport (\n    \"testing\"\n    \"fmt\"\n)\n\nfunc TestA(t *testing.T) {}\n"
        );
        assert_eq!(delta, 5);
        assert_eq!(inj.update_imports(&path, "\"fmt\"").unwrap(), 0);
    }
}

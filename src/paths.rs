//! Test file discovery and creation
//!
//! Maps a source file to the test file its language conventionally uses.

use crate::error::{GenError, Result};
use crate::lang::Language;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static GO_PACKAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^package\s+\w+").expect("go package regex"));

static GO_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^module\s+"?([^\s"]+)"?"#).expect("go module regex"));

static JAVA_PACKAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^package\s+[\w.]+;").expect("java package regex"));

const JAVA_MAIN: &str = "src/main/java/";
const JAVA_TEST: &str = "src/test/java/";

fn split_name(source: &Path) -> Result<(&str, &str)> {
    let stem = source.file_stem().and_then(|s| s.to_str());
    let ext = source.extension().and_then(|s| s.to_str());
    match (stem, ext) {
        (Some(stem), Some(ext)) if !stem.is_empty() => Ok((stem, ext)),
        _ => Err(GenError::Config(format!(
            "cannot derive a test file name from '{}'",
            source.display()
        ))),
    }
}

/// Conventional test file for `source`.
///
/// Go, JavaScript and TypeScript tests sit beside the source. Python tests go
/// to `test_dir` when one is given. Java sources under `src/main/java` map to
/// the mirrored path under `src/test/java`.
pub fn test_file_path(source: &Path, language: Language, test_dir: Option<&Path>) -> Result<PathBuf> {
    let (stem, ext) = split_name(source)?;
    let dir = source.parent().unwrap_or_else(|| Path::new(""));

    let path = match language {
        Language::Go => dir.join(format!("{}_test.go", stem)),
        Language::JavaScript | Language::TypeScript => dir.join(format!("{}.test.{}", stem, ext)),
        Language::Python => test_dir
            .unwrap_or(dir)
            .join(format!("test_{}.py", stem)),
        Language::Java => {
            let file = format!("{}Test.java", stem);
            let source_dir = dir.to_string_lossy().replace('\\', "/");
            let mirrored = if let Some(idx) = source_dir.find(JAVA_MAIN) {
                format!(
                    "{}{}{}",
                    &source_dir[..idx],
                    JAVA_TEST,
                    &source_dir[idx + JAVA_MAIN.len()..]
                )
            } else if let Some(rest) = source_dir.strip_suffix("src/main/java") {
                format!("{}src/test/java", rest)
            } else {
                source_dir
            };
            PathBuf::from(mirrored).join(file)
        }
    };
    Ok(path)
}

/// Whether `path` looks like a test file rather than code under test.
///
/// Directory names only count below `base`, so a project checked out under
/// `/home/ci/tests/` is not mistaken for a test tree.
pub fn is_test_file(path: &Path, base: Option<&Path>) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let relative = base
        .and_then(|base| path.strip_prefix(base).ok())
        .unwrap_or(path);
    let in_test_tree = relative.is_relative()
        && relative
            .parent()
            .into_iter()
            .flat_map(Path::components)
            .any(|c| matches!(c.as_os_str().to_str(), Some("__tests__") | Some("test") | Some("tests")));
    name.ends_with("_test.go")
        || name.contains(".test.")
        || name.contains(".spec.")
        || (name.starts_with("test_") && name.ends_with(".py"))
        || name.ends_with("_test.py")
        || name.ends_with("Test.java")
        || name == "conftest.py"
        || in_test_tree
}

/// Initial content for a new test file: the source's package clause for Go
/// and Java, nothing otherwise
fn initial_content(source: &Path, language: Language) -> String {
    let pattern = match language {
        Language::Go => &GO_PACKAGE,
        Language::Java => &JAVA_PACKAGE,
        _ => return String::new(),
    };
    fs::read_to_string(source)
        .ok()
        .and_then(|src| pattern.find(&src).map(|m| format!("{}\n", m.as_str())))
        .unwrap_or_default()
}

/// Create `test_path` (and its directories) if missing. Returns whether the
/// file was created.
pub fn create_test_file(test_path: &Path, source: &Path, language: Language) -> Result<bool> {
    if test_path.exists() {
        return Ok(false);
    }
    if let Some(dir) = test_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| GenError::io("failed to create test directory", dir, e))?;
    }
    fs::write(test_path, initial_content(source, language))
        .map_err(|e| GenError::io("failed to create test file", test_path, e))?;
    tracing::info!(path = %test_path.display(), "created test file");
    Ok(true)
}

pub fn is_file_empty(path: &Path) -> Result<bool> {
    let metadata =
        fs::metadata(path).map_err(|e| GenError::io("failed to check test file", path, e))?;
    Ok(metadata.len() == 0)
}

/// Module path declared in `dir/go.mod`
fn go_module(dir: &Path) -> Option<String> {
    let content = fs::read_to_string(dir.join("go.mod")).ok()?;
    GO_MODULE.captures(&content).map(|c| c[1].to_string())
}

/// Resolve a file named in a coverage report to a file on disk.
///
/// Tried in order: the name as given, the name under `base`, a Go import
/// path with the module prefix from `base/go.mod` replaced by `base`, and
/// finally the longest trailing part of the name that exists under `base`.
/// Returns `None` when nothing matches.
pub fn resolve_report_path(reported: &str, base: Option<&Path>) -> Option<PathBuf> {
    let path = PathBuf::from(reported);
    if path.exists() {
        return Some(path);
    }
    let base = base.unwrap_or_else(|| Path::new(""));
    let joined = base.join(&path);
    if joined.exists() {
        return Some(joined);
    }

    if let Some(module) = go_module(base) {
        let local = reported
            .strip_prefix(module.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|rest| base.join(rest));
        if let Some(local) = local.filter(|p| p.exists()) {
            return Some(local);
        }
    }

    let mut components = path.components();
    while components.next().is_some() {
        let rest = components.as_path();
        if rest.as_os_str().is_empty() {
            break;
        }
        let candidate = base.join(rest);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_per_language() {
        let p = |s: &str, l: Language, d: Option<&str>| {
            test_file_path(Path::new(s), l, d.map(Path::new)).unwrap()
        };
        assert_eq!(p("pkg/calc/calc.go", Language::Go, None), PathBuf::from("pkg/calc/calc_test.go"));
        assert_eq!(p("src/sum.js", Language::JavaScript, None), PathBuf::from("src/sum.test.js"));
        assert_eq!(p("src/App.tsx", Language::TypeScript, None), PathBuf::from("src/App.test.tsx"));
        assert_eq!(p("app/calc.py", Language::Python, None), PathBuf::from("app/test_calc.py"));
        assert_eq!(p("app/calc.py", Language::Python, Some("tests")), PathBuf::from("tests/test_calc.py"));
        assert_eq!(
            p("svc/src/main/java/com/acme/Calc.java", Language::Java, None),
            PathBuf::from("svc/src/test/java/com/acme/CalcTest.java")
        );
        assert_eq!(p("Calc.java", Language::Java, None), PathBuf::from("CalcTest.java"));
    }

    #[test]
    fn test_is_test_file() {
        assert!(is_test_file(Path::new("pkg/calc_test.go"), None));
        assert!(is_test_file(Path::new("src/sum.test.js"), None));
        assert!(is_test_file(Path::new("tests/helpers.py"), None));
        assert!(is_test_file(Path::new("app/test_calc.py"), None));
        assert!(!is_test_file(Path::new("app/calc.py"), None));
        assert!(!is_test_file(Path::new("src/main/java/Latest.java"), None));
    }

    #[test]
    fn test_test_tree_only_counts_below_base() {
        let base = Path::new("/home/ci/tests/myproj");
        assert!(!is_test_file(Path::new("/home/ci/tests/myproj/app/calc.py"), Some(base)));
        assert!(is_test_file(Path::new("/home/ci/tests/myproj/tests/helpers.py"), Some(base)));
        assert!(!is_test_file(Path::new("/home/ci/tests/myproj/app/calc.py"), None));
        assert!(is_test_file(Path::new("/home/ci/tests/myproj/app/test_calc.py"), None));
    }

    #[test]
    fn test_report_path_maps_go_module_prefix() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(tmp.path().join("go.mod"), "module example.com/calc\n\ngo 1.22\n").unwrap();
        fs::create_dir_all(tmp.path().join("internal")).unwrap();
        fs::write(tmp.path().join("calc.go"), "package calc\n").unwrap();
        fs::write(tmp.path().join("internal").join("math.go"), "package internal\n").unwrap();

        assert_eq!(
            resolve_report_path("example.com/calc/calc.go", Some(tmp.path())),
            Some(tmp.path().join("calc.go"))
        );
        assert_eq!(
            resolve_report_path("example.com/calc/internal/math.go", Some(tmp.path())),
            Some(tmp.path().join("internal").join("math.go"))
        );
        assert_eq!(resolve_report_path("example.com/calc/gone.go", Some(tmp.path())), None);
    }

    #[test]
    fn test_report_path_falls_back_to_trailing_components() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("app")).unwrap();
        fs::write(tmp.path().join("app").join("calc.py"), "").unwrap();

        assert_eq!(
            resolve_report_path("app/calc.py", Some(tmp.path())),
            Some(tmp.path().join("app").join("calc.py"))
        );
        assert_eq!(
            resolve_report_path("/build/agent/work/app/calc.py", Some(tmp.path())),
            Some(tmp.path().join("app").join("calc.py"))
        );
    }

    #[test]
    fn test_create_go_test_file_copies_package() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("calc.go");
        fs::write(&src, "// Package calc adds.\npackage calc\n\nfunc Add(a, b int) int { return a + b }\n").unwrap();
        let test = tmp.path().join("sub").join("calc_test.go");

        assert!(create_test_file(&test, &src, Language::Go).unwrap());
        assert_eq!(fs::read_to_string(&test).unwrap(), "package calc\n");
        assert!(!is_file_empty(&test).unwrap());
        assert!(!create_test_file(&test, &src, Language::Go).unwrap());
    }

    #[test]
    fn test_create_python_test_file_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("calc.py");
        fs::write(&src, "def add(a, b):\n    return a + b\n").unwrap();
        let test = tmp.path().join("test_calc.py");
        assert!(create_test_file(&test, &src, Language::Python).unwrap());
        assert!(is_file_empty(&test).unwrap());
    }
}

use super::{Language, LanguageHandler, COMMENT_PREFIX_SLASH};
use crate::error::Result;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static IMPORT_STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^import\s+[^;\n]*;").expect("java import regex"));

static IMPORT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^import\s+[^;\n]*;$").expect("java import line regex"));

static PACKAGE_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^package\s+[^;\n]*;").expect("java package regex"));

/// `[INFO]    +- group:artifact:jar:version:scope` lines of `mvn dependency:list`
static MAVEN_DEPENDENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[INFO\]\s*[+|\\\-]{0,2}\s*([\w.\-]+:[\w.\-]+):jar:([\w.\-]+):([\w.\-]+)")
        .expect("maven dependency regex")
});

#[derive(Debug, Default)]
pub struct JavaHandler;

impl JavaHandler {
    pub fn new() -> Self {
        Self
    }
}

/// Strip list bullets and quoting a model wraps around an import statement
fn clean_statement(raw: &str) -> String {
    let s = raw.trim();
    let s = s
        .strip_prefix("- ")
        .or_else(|| s.strip_prefix("* "))
        .unwrap_or(s);
    s.trim().trim_matches(|c| c == '"' || c == '`').trim().to_string()
}

impl LanguageHandler for JavaHandler {
    fn language(&self) -> Language {
        Language::Java
    }

    fn list_dependencies_commands(&self) -> &'static [&'static str] {
        &["mvn dependency:list -DincludeScope=compile -Dstyle.color=never -B"]
    }

    fn parse_dependencies(&self, output: &str) -> Vec<String> {
        let mut dependencies = Vec::new();
        let mut in_section = false;

        for line in output.lines() {
            let mut cleaned = line.trim().to_string();
            if let Some(rest) = cleaned.strip_prefix("[INFO]") {
                cleaned = format!("[INFO]{}", rest.trim());
            }

            if cleaned.contains("maven-dependency-plugin") && cleaned.contains(":list") {
                in_section = true;
                continue;
            }
            if in_section && (cleaned.contains("BUILD SUCCESS") || cleaned.contains("---")) {
                in_section = false;
                continue;
            }
            if !in_section || !cleaned.starts_with("[INFO]") {
                continue;
            }

            if let Some(caps) = MAVEN_DEPENDENCY.captures(&cleaned) {
                dependencies.push(format!("{}:{}", &caps[1], &caps[2]));
                continue;
            }

            let entry = cleaned
                .trim_start_matches("[INFO]")
                .trim()
                .trim_start_matches("+-")
                .trim_start_matches("\\-")
                .trim_start_matches('|')
                .trim();
            let parts: Vec<&str> = entry.split(':').collect();
            if parts.len() >= 5 {
                dependencies.push(format!("{}:{}:{}", parts[0], parts[1], parts[3]));
            }
        }
        dependencies
    }

    fn normalize_dependency(&self, entry: &str) -> String {
        // group:artifact[:...]
        let mut parts = entry.trim().split(':');
        match (parts.next(), parts.next()) {
            (Some(group), Some(artifact)) => format!("{}:{}", group, artifact),
            _ => entry.trim().to_string(),
        }
    }

    fn package_name(&self, install_command: &str) -> Option<String> {
        // mvn dependency:get -Dartifact=group:artifact:version
        if let Some(artifact) = install_command
            .split_whitespace()
            .find_map(|t| t.strip_prefix("-Dartifact="))
        {
            return Some(self.normalize_dependency(artifact));
        }
        super::install_target(install_command).map(|t| self.normalize_dependency(t))
    }

    fn uninstall_command(&self, package: &str) -> String {
        format!(
            "mvn dependency:purge-local-repository -DreResolve=false -Dinclude={}",
            package
        )
    }

    fn merge_imports(&self, content: &str, new_imports: &[String]) -> Result<String> {
        let existing: Vec<regex::Match> = IMPORT_STATEMENT.find_iter(content).collect();
        let mut seen: HashSet<String> = existing.iter().map(|m| m.as_str().to_string()).collect();

        let mut to_add = Vec::new();
        for raw in new_imports {
            let statement = clean_statement(raw);
            if IMPORT_LINE.is_match(&statement) && seen.insert(statement.clone()) {
                to_add.push(statement);
            }
        }
        if to_add.is_empty() {
            return Ok(content.to_string());
        }
        let block = to_add.join("\n");

        if let Some(last) = existing.last() {
            let at = last.end();
            return Ok(format!("{}\n{}{}", &content[..at], block, &content[at..]));
        }
        if let Some(package) = PACKAGE_CLAUSE.find(content) {
            let at = package.end();
            return Ok(format!("{}\n\n{}{}", &content[..at], block, &content[at..]));
        }
        if content.is_empty() {
            return Ok(format!("{}\n", block));
        }
        Ok(format!("{}\n\n{}", block, content))
    }

    fn comment_prefix(&self) -> &'static str {
        COMMENT_PREFIX_SLASH
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn imports(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_appends_after_last_import() {
        let content = "package com.acme;\n\nimport java.util.List;\nimport org.junit.jupiter.api.Test;\n\nclass CalcTest {}\n";
        let out = JavaHandler::new()
            .merge_imports(
                content,
                &imports(&["import java.util.List;", "- import java.util.Map;", "\"import static org.junit.jupiter.api.Assertions.*;\""]),
            )
            .unwrap();
        assert_eq!(
            out,
            "package com.acme;\n\nimport java.util.List;\nimport org.junit.jupiter.api.Test;\nimport java.util.Map;\nimport static org.junit.jupiter.api.Assertions.*;\n\nclass CalcTest {}\n"
        );
    }

    #[test]
    fn test_inserts_after_package_without_imports() {
        let content = "package com.acme;\n\nclass CalcTest {}\n";
        let out = JavaHandler::new()
            .merge_imports(content, &imports(&["import java.util.Map;"]))
            .unwrap();
        assert_eq!(
            out,
            "package com.acme;\n\nimport java.util.Map;\n\nclass CalcTest {}\n"
        );
    }

    #[test]
    fn test_inserts_at_start_without_package() {
        let out = JavaHandler::new()
            .merge_imports("class CalcTest {}\n", &imports(&["import java.util.Map;"]))
            .unwrap();
        assert_eq!(out, "import java.util.Map;\n\nclass CalcTest {}\n");
    }

    #[test]
    fn test_ignores_non_import_lines() {
        let content = "class CalcTest {}\n";
        let out = JavaHandler::new()
            .merge_imports(content, &imports(&["junit", ""]))
            .unwrap();
        assert_eq!(out, content);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let handler = JavaHandler::new();
        let new = imports(&["import java.util.Map;", "import java.io.File;"]);
        for content in [
            "package a;\n\nimport java.util.List;\n\nclass T {}\n",
            "package a;\n\nclass T {}\n",
            "class T {}\n",
        ] {
            let once = handler.merge_imports(content, &new).unwrap();
            assert_eq!(handler.merge_imports(&once, &new).unwrap(), once);
        }
    }

    #[test]
    fn test_parse_maven_dependency_list() {
        let output = "\
[INFO] Scanning for projects...
[INFO] --- maven-dependency-plugin:3.6.0:list (default-cli) @ demo ---
[INFO]
[INFO] The following files have been resolved:
[INFO]    org.apache.commons:commons-lang3:jar:3.14.0:compile
[INFO]    com.google.guava:guava:jar:33.0.0-jre:compile
[INFO] BUILD SUCCESS
";
        let deps = JavaHandler::new().parse_dependencies(output);
        assert_eq!(
            deps,
            vec![
                "org.apache.commons:commons-lang3:3.14.0".to_string(),
                "com.google.guava:guava:33.0.0-jre".to_string(),
            ]
        );
        assert_eq!(
            JavaHandler::new().normalize_dependency(&deps[0]),
            "org.apache.commons:commons-lang3"
        );
    }

    #[test]
    fn test_package_name_from_artifact_flag() {
        let handler = JavaHandler::new();
        assert_eq!(
            handler
                .package_name("mvn dependency:get -Dartifact=org.mockito:mockito-core:5.11.0")
                .as_deref(),
            Some("org.mockito:mockito-core")
        );
    }
}

use super::{Language, LanguageHandler, COMMENT_PREFIX_SLASH};
use crate::error::Result;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// ES module imports (`import x from 'y'`, `import 'y'`) and CommonJS
/// `const x = require('y')`
static JS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?:import\s+.*?from\s+['"].*?['"];?|import\s+['"][^'"]+['"];?|const\s+.*?=\s+require\(['"].*?['"]\);?)$"#,
    )
    .expect("javascript import regex")
});

static TS_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^import\s+.*?;$").expect("typescript import regex"));

const NPM_LIST: &str = "npm list --depth=0 --parseable | sed 's|.*/||'";

/// Hoist every import statement into one deduplicated block at the top.
///
/// Only statements starting in column 0 are hoisted, so a `require` inside
/// a test body stays where it is. Statements are compared by their literal
/// text. Existing ones keep their relative order, new ones follow.
/// Non-import lines keep their order below a single blank line.
fn merge_module_imports(content: &str, new_imports: &[String], pattern: &Regex) -> String {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut imports: Vec<&str> = Vec::new();
    let mut body: Vec<&str> = Vec::new();

    for line in content.split('\n') {
        let trimmed = line.trim_end();
        if pattern.is_match(trimmed) {
            if seen.insert(trimmed) {
                imports.push(trimmed);
            }
        } else {
            body.push(line);
        }
    }

    let mut added = false;
    for statement in new_imports {
        let trimmed = statement.trim();
        if pattern.is_match(trimmed) && seen.insert(trimmed) {
            imports.push(trimmed);
            added = true;
        }
    }
    if !added {
        return content.to_string();
    }

    while body.last().is_some_and(|l| l.trim().is_empty()) {
        body.pop();
    }
    let leading_blank = body.iter().take_while(|l| l.trim().is_empty()).count();
    let body = &body[leading_blank..];

    let mut merged = imports.join("\n");
    if !body.is_empty() {
        merged.push_str("\n\n");
        merged.push_str(&body.join("\n"));
    }
    if content.ends_with('\n') || body.is_empty() {
        merged.push('\n');
    }
    merged
}

fn strip_npm_version(target: &str) -> &str {
    // keep the scope of `@scope/name@1.2.3`
    match target.char_indices().skip(1).find(|(_, c)| *c == '@') {
        Some((idx, _)) => &target[..idx],
        None => target,
    }
}

#[derive(Debug, Default)]
pub struct JavaScriptHandler;

impl JavaScriptHandler {
    pub fn new() -> Self {
        Self
    }
}

impl LanguageHandler for JavaScriptHandler {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn list_dependencies_commands(&self) -> &'static [&'static str] {
        &[NPM_LIST]
    }

    fn strip_version<'a>(&self, target: &'a str) -> &'a str {
        strip_npm_version(target)
    }

    fn uninstall_command(&self, package: &str) -> String {
        format!("npm uninstall {}", package)
    }

    fn merge_imports(&self, content: &str, new_imports: &[String]) -> Result<String> {
        Ok(merge_module_imports(content, new_imports, &JS_IMPORT))
    }

    fn comment_prefix(&self) -> &'static str {
        COMMENT_PREFIX_SLASH
    }
}

#[derive(Debug, Default)]
pub struct TypeScriptHandler;

impl TypeScriptHandler {
    pub fn new() -> Self {
        Self
    }
}

impl LanguageHandler for TypeScriptHandler {
    fn language(&self) -> Language {
        Language::TypeScript
    }

    fn list_dependencies_commands(&self) -> &'static [&'static str] {
        &[NPM_LIST]
    }

    fn strip_version<'a>(&self, target: &'a str) -> &'a str {
        strip_npm_version(target)
    }

    fn uninstall_command(&self, package: &str) -> String {
        format!("npm uninstall {}", package)
    }

    fn merge_imports(&self, content: &str, new_imports: &[String]) -> Result<String> {
        Ok(merge_module_imports(content, new_imports, &TS_IMPORT))
    }

    fn comment_prefix(&self) -> &'static str {
        COMMENT_PREFIX_SLASH
    }
}

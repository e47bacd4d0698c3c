use super::{Language, LanguageHandler, COMMENT_PREFIX_SLASH};
use crate::error::{GenError, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// An import declaration: grouped `import ( ... )` or a single-line spec
static IMPORT_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^import[ \t]*(?:\([^)]*\)|[^\n(]*"[^"\n]*")"#).expect("go import regex")
});

static PACKAGE_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^package\s+\w+").expect("go package regex"));

const DEFAULT_INDENT: &str = "    ";

#[derive(Debug, Default)]
pub struct GoHandler;

impl GoHandler {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Spec { alias: Option<String>, path: String },
    Comment(String),
    Blank,
}

impl Entry {
    fn render(&self, indent: &str) -> String {
        match self {
            Entry::Spec { alias: Some(alias), path } => format!("{}{} \"{}\"", indent, alias, path),
            Entry::Spec { alias: None, path } => format!("{}\"{}\"", indent, path),
            Entry::Comment(text) => format!("{}{}", indent, text),
            Entry::Blank => String::new(),
        }
    }

    /// Dedup key: the spec as it appears inside a block
    fn key(&self) -> Option<String> {
        match self {
            Entry::Spec { .. } => Some(self.render("")),
            _ => None,
        }
    }
}

/// Parse one import spec line. Accepts `"fmt"`, `f "fmt"`, `import "fmt"`
/// and bare `fmt` as models sometimes produce.
fn parse_spec(line: &str) -> Option<Entry> {
    let line = line.trim();
    let line = match line.strip_prefix("import") {
        Some(rest) if rest.starts_with(|c: char| c.is_whitespace() || c == '"' || c == '(') => {
            rest.trim()
        }
        _ => line,
    };
    if line.is_empty() || line == "(" || line == ")" {
        return None;
    }
    if line.starts_with("//") {
        return Some(Entry::Comment(line.to_string()));
    }

    match line.find('"') {
        Some(quote) => {
            let alias = line[..quote].trim();
            let path = line[quote..].trim().trim_matches('"').to_string();
            if path.is_empty() {
                return None;
            }
            Some(Entry::Spec {
                alias: (!alias.is_empty()).then(|| alias.to_string()),
                path,
            })
        }
        None => Some(Entry::Spec {
            alias: None,
            path: line.trim_matches('`').to_string(),
        }),
    }
}

fn parse_declaration(decl: &str) -> Vec<Entry> {
    let body = decl.trim_start().strip_prefix("import").unwrap_or(decl).trim();
    let grouped = body.starts_with('(');
    let inner = body.trim_start_matches('(').trim_end_matches(')');

    let mut entries = Vec::new();
    for line in inner.split('\n') {
        if line.trim().is_empty() {
            if grouped {
                entries.push(Entry::Blank);
            }
            continue;
        }
        if let Some(entry) = parse_spec(line) {
            entries.push(entry);
        }
    }
    trim_blank_entries(&mut entries);
    entries
}

fn trim_blank_entries(entries: &mut Vec<Entry>) {
    while entries.last() == Some(&Entry::Blank) {
        entries.pop();
    }
    let leading = entries.iter().take_while(|e| **e == Entry::Blank).count();
    entries.drain(..leading);
}

/// Indentation used inside an existing grouped block, so tab-indented
/// (gofmt) files stay tab-indented
fn block_indent(decl: &str) -> &'static str {
    let indented = decl
        .lines()
        .skip(1)
        .find(|l| !l.trim().is_empty() && l.trim() != ")");
    match indented {
        Some(line) if line.starts_with('\t') => "\t",
        _ => DEFAULT_INDENT,
    }
}

fn render_block(entries: &[Entry], indent: &str) -> String {
    let mut block = String::from("import (\n");
    for entry in entries {
        block.push_str(&entry.render(indent));
        block.push('\n');
    }
    block.push(')');
    block
}

impl LanguageHandler for GoHandler {
    fn language(&self) -> Language {
        Language::Go
    }

    fn list_dependencies_commands(&self) -> &'static [&'static str] {
        &["go list -m all"]
    }

    fn normalize_dependency(&self, entry: &str) -> String {
        // `go list -m all` prints "module/path v1.2.3"
        let module = entry.split_whitespace().next().unwrap_or("");
        self.strip_version(module).to_string()
    }

    fn strip_version<'a>(&self, target: &'a str) -> &'a str {
        target.split('@').next().unwrap_or(target)
    }

    fn uninstall_command(&self, package: &str) -> String {
        format!("go mod edit -droprequire {} && go mod tidy", package)
    }

    fn merge_imports(&self, content: &str, new_imports: &[String]) -> Result<String> {
        let new_entries: Vec<Entry> = new_imports
            .iter()
            .filter_map(|line| parse_spec(line))
            .filter(|e| matches!(e, Entry::Spec { .. }))
            .collect();

        let mut declarations = IMPORT_DECL.find_iter(content);
        if let Some(decl) = declarations.next() {
            let mut entries = parse_declaration(decl.as_str());
            let mut seen: HashSet<String> = entries.iter().filter_map(Entry::key).collect();
            // later declarations stay put; their specs only count as present
            seen.extend(
                declarations
                    .flat_map(|d| parse_declaration(d.as_str()))
                    .filter_map(|e| e.key()),
            );

            let mut added = false;
            for entry in new_entries {
                if let Some(key) = entry.key() {
                    if seen.insert(key) {
                        entries.push(entry);
                        added = true;
                    }
                }
            }
            if !added {
                return Ok(content.to_string());
            }

            let block = render_block(&entries, block_indent(decl.as_str()));
            return Ok(format!(
                "{}{}{}",
                &content[..decl.start()],
                block,
                &content[decl.end()..]
            ));
        }

        let package = PACKAGE_CLAUSE
            .find(content)
            .ok_or_else(|| GenError::Imports("could not find package declaration".to_string()))?;

        let mut seen = HashSet::new();
        let entries: Vec<Entry> = new_entries
            .into_iter()
            .filter(|e| e.key().map(|k| seen.insert(k)).unwrap_or(false))
            .collect();
        if entries.is_empty() {
            return Ok(content.to_string());
        }

        let block = render_block(&entries, DEFAULT_INDENT);
        let insert_at = package.end();
        Ok(format!(
            "{}\n\n{}{}",
            &content[..insert_at],
            block,
            &content[insert_at..]
        ))
    }

    fn comment_prefix(&self) -> &'static str {
        COMMENT_PREFIX_SLASH
    }
}

use super::{Language, LanguageHandler, COMMENT_PREFIX_HASH};
use crate::error::Result;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Trailing comment that pins an import line in place
pub const PRESERVE_MARKER: &str = "# checking coverage for file - do not remove";

const PRESERVE_TEXT: &str = "checking coverage for file - do not remove";

#[derive(Debug, Default)]
pub struct PythonHandler;

impl PythonHandler {
    pub fn new() -> Self {
        Self
    }
}

/// One `from <module> import <names>` statement
#[derive(Debug)]
struct FromImport {
    module: String,
    names: Vec<String>,
    preserved: bool,
}

fn parse_from_import(line: &str) -> Option<FromImport> {
    let trimmed = line.trim();
    let (code, comment) = match trimmed.find('#') {
        Some(idx) => (trimmed[..idx].trim(), &trimmed[idx..]),
        None => (trimmed, ""),
    };
    let rest = code.strip_prefix("from ")?;
    let (module, names) = rest.split_once(" import ")?;
    let module = module.trim();
    if module.is_empty() {
        return None;
    }

    let names = names.trim();
    // parenthesized lists are only handled when they close on the same line
    let names = match names.strip_prefix('(') {
        Some(inner) => inner.strip_suffix(')')?,
        None => names,
    };
    let names: Vec<String> = names
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return None;
    }

    Some(FromImport {
        module: module.to_string(),
        names,
        preserved: comment.contains(PRESERVE_TEXT),
    })
}

/// `import a, b as c` normalized to single spacing
fn normalize_plain_import(line: &str) -> Option<String> {
    let code = line.split('#').next().unwrap_or("").trim();
    if !code.starts_with("import ") {
        return None;
    }
    Some(code.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn is_top_level(line: &str) -> bool {
    !line.starts_with(|c: char| c.is_whitespace())
}

#[derive(Debug)]
struct ModuleImports {
    module: String,
    names: BTreeSet<String>,
    /// Line index of the first statement for this module, `None` for modules
    /// that only come from the new imports
    line: Option<usize>,
    /// Later statements for the same module, folded into the first
    duplicates: Vec<usize>,
    preserved: bool,
    changed: bool,
}

impl ModuleImports {
    fn render(&self) -> String {
        let names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        let mut line = format!("from {} import {}", self.module, names.join(", "));
        if self.preserved {
            line.push(' ');
            line.push_str(PRESERVE_MARKER);
        }
        line
    }
}

impl LanguageHandler for PythonHandler {
    fn language(&self) -> Language {
        Language::Python
    }

    fn list_dependencies_commands(&self) -> &'static [&'static str] {
        &["pip freeze", "pip3 freeze"]
    }

    fn normalize_dependency(&self, entry: &str) -> String {
        self.strip_version(entry.trim())
            .trim()
            .to_ascii_lowercase()
            .replace('_', "-")
    }

    fn strip_version<'a>(&self, target: &'a str) -> &'a str {
        let end = target
            .find(|c: char| matches!(c, '=' | '<' | '>' | '~' | '!' | '[' | ';' | ' ' | '@'))
            .unwrap_or(target.len());
        &target[..end]
    }

    fn uninstall_command(&self, package: &str) -> String {
        format!("pip uninstall -y {}", package)
    }

    fn merge_imports(&self, content: &str, new_imports: &[String]) -> Result<String> {
        let lines: Vec<&str> = content.split('\n').collect();

        let mut modules: Vec<ModuleImports> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();
        let mut plain: HashSet<String> = HashSet::new();

        for (idx, line) in lines.iter().enumerate() {
            if !is_top_level(line) {
                continue;
            }
            if let Some(parsed) = parse_from_import(line) {
                match by_name.get(&parsed.module) {
                    Some(&pos) => {
                        let entry = &mut modules[pos];
                        entry.names.extend(parsed.names);
                        entry.duplicates.push(idx);
                        entry.preserved |= parsed.preserved;
                        entry.changed = true;
                    }
                    None => {
                        by_name.insert(parsed.module.clone(), modules.len());
                        modules.push(ModuleImports {
                            module: parsed.module,
                            names: parsed.names.into_iter().collect(),
                            line: Some(idx),
                            duplicates: Vec::new(),
                            preserved: parsed.preserved,
                            changed: false,
                        });
                    }
                }
            } else if let Some(statement) = normalize_plain_import(line) {
                plain.insert(statement);
            }
        }

        let mut new_plain: Vec<String> = Vec::new();
        for statement in new_imports {
            let statement = statement.trim();
            if statement.is_empty() || statement == "\"\"" {
                continue;
            }
            if let Some(parsed) = parse_from_import(statement) {
                match by_name.get(&parsed.module) {
                    Some(&pos) => {
                        let entry = &mut modules[pos];
                        for name in parsed.names {
                            if entry.names.insert(name) {
                                entry.changed = true;
                            }
                        }
                    }
                    None => {
                        by_name.insert(parsed.module.clone(), modules.len());
                        modules.push(ModuleImports {
                            module: parsed.module,
                            names: parsed.names.into_iter().collect(),
                            line: None,
                            duplicates: Vec::new(),
                            preserved: false,
                            changed: true,
                        });
                    }
                }
            } else if let Some(normalized) = normalize_plain_import(statement) {
                if plain.insert(normalized.clone()) {
                    new_plain.push(normalized);
                }
            }
        }

        if new_plain.is_empty() && !modules.iter().any(|m| m.changed) {
            return Ok(content.to_string());
        }

        let mut header: Vec<String> = modules
            .iter()
            .filter(|m| m.line.is_none())
            .map(ModuleImports::render)
            .collect();
        header.extend(new_plain);

        let mut rewritten: HashMap<usize, String> = HashMap::new();
        let mut dropped: HashSet<usize> = HashSet::new();
        for module in modules.iter().filter(|m| m.changed) {
            if let Some(line) = module.line {
                rewritten.insert(line, module.render());
                dropped.extend(module.duplicates.iter().copied());
            }
        }

        // `from __future__` must stay the first statement
        let insert_at = lines
            .iter()
            .rposition(|l| is_top_level(l) && l.starts_with("from __future__ "))
            .map_or(0, |idx| idx + 1);

        let mut out: Vec<String> = Vec::with_capacity(lines.len() + header.len() + 1);
        let mut header = Some(header).filter(|h| !h.is_empty());
        for (idx, line) in lines.iter().enumerate() {
            if idx == insert_at {
                if let Some(header) = header.take() {
                    out.extend(header);
                    let next = line.trim();
                    let next_is_import = next.starts_with("from ") || next.starts_with("import ");
                    if !next.is_empty() && !next_is_import {
                        out.push(String::new());
                    }
                }
            }
            if dropped.contains(&idx) {
                continue;
            }
            match rewritten.get(&idx) {
                Some(line) => out.push(line.clone()),
                None => out.push(line.to_string()),
            }
        }
        if let Some(header) = header {
            out.extend(header);
        }
        Ok(out.join("\n"))
    }

    fn comment_prefix(&self) -> &'static str {
        COMMENT_PREFIX_HASH
    }
}

//! Report parsers
//!
//! Each parser reduces a report to per-file line (or statement) counts.
//! Only the numbers the generator needs are extracted; everything else in the
//! report is ignored.

use crate::error::{GenError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static CLASS_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<class\b([^>]*)>(.*?)</class>"#).expect("cobertura class regex")
});

static LINE_ELEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<line\b([^>]*)/?>"#).expect("cobertura line regex"));

static SOURCE_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<source>\s*([^<]*?)\s*</source>"#).expect("cobertura source regex")
});

/// `path/file.go:12.34,15.2 3 1`
static GO_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+):(\d+\.\d+,\d+\.\d+)\s+(\d+)\s+(\d+)$").expect("go coverprofile regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Detect from the report content
    #[default]
    Auto,
    Cobertura,
    Lcov,
    Go,
}

impl ReportFormat {
    pub fn detect(content: &str) -> Result<Self> {
        let head = content.trim_start();
        if head.starts_with("mode:") {
            Ok(ReportFormat::Go)
        } else if head.starts_with("<?xml") || head.starts_with("<coverage") || head.contains("<class ") {
            Ok(ReportFormat::Cobertura)
        } else if content.lines().any(|l| l.starts_with("SF:")) {
            Ok(ReportFormat::Lcov)
        } else {
            Err(GenError::Coverage(
                "could not detect the coverage report format".to_string(),
            ))
        }
    }
}

impl FromStr for ReportFormat {
    type Err = GenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(ReportFormat::Auto),
            "cobertura" | "xml" => Ok(ReportFormat::Cobertura),
            "lcov" => Ok(ReportFormat::Lcov),
            "go" | "coverprofile" => Ok(ReportFormat::Go),
            other => Err(GenError::Config(format!(
                "unsupported coverage format '{}' (expected cobertura, lcov, go or auto)",
                other
            ))),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReportFormat::Auto => "auto",
            ReportFormat::Cobertura => "cobertura",
            ReportFormat::Lcov => "lcov",
            ReportFormat::Go => "go",
        };
        f.write_str(name)
    }
}

/// Covered and coverable units for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCoverage {
    pub path: String,
    pub covered: u64,
    pub total: u64,
}

pub fn parse(format: ReportFormat, content: &str) -> Result<Vec<FileCoverage>> {
    match format {
        // detect never answers Auto
        ReportFormat::Auto => parse(ReportFormat::detect(content)?, content),
        ReportFormat::Cobertura => parse_cobertura(content),
        ReportFormat::Lcov => parse_lcov(content),
        ReportFormat::Go => parse_go(content),
    }
}

fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{}=\"", name);
    let mut search = attrs;
    while let Some(idx) = search.find(&needle) {
        // avoid matching `filename=` when looking for `name=`
        let boundary = idx == 0 || search[..idx].ends_with(char::is_whitespace);
        let rest = &search[idx + needle.len()..];
        if boundary {
            return rest.find('"').map(|end| &rest[..end]);
        }
        search = rest;
    }
    None
}

/// Aggregate `(path, line) -> hits` so a line listed both under a method
/// and under its class is counted once
fn collect_lines(files: BTreeMap<String, BTreeMap<u64, u64>>) -> Vec<FileCoverage> {
    files
        .into_iter()
        .map(|(path, lines)| FileCoverage {
            covered: lines.values().filter(|hits| **hits > 0).count() as u64,
            total: lines.len() as u64,
            path,
        })
        .collect()
}

fn parse_cobertura(content: &str) -> Result<Vec<FileCoverage>> {
    let source = SOURCE_ELEMENT
        .captures(content)
        .map(|c| c[1].trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty() && s != ".");

    let mut files: BTreeMap<String, BTreeMap<u64, u64>> = BTreeMap::new();
    let mut classes = 0;
    for class in CLASS_ELEMENT.captures_iter(content) {
        classes += 1;
        let Some(filename) = attribute(&class[1], "filename") else {
            continue;
        };
        let path = match &source {
            Some(root) if !filename.starts_with('/') => format!("{}/{}", root, filename),
            _ => filename.to_string(),
        };

        let lines = files.entry(path).or_default();
        for line in LINE_ELEMENT.captures_iter(&class[2]) {
            let number = attribute(&line[1], "number").and_then(|n| n.parse::<u64>().ok());
            let hits = attribute(&line[1], "hits").and_then(|h| h.parse::<u64>().ok());
            if let (Some(number), Some(hits)) = (number, hits) {
                let entry = lines.entry(number).or_insert(0);
                *entry = (*entry).max(hits);
            }
        }
    }

    if classes == 0 && !content.contains("<coverage") {
        return Err(GenError::Coverage("not a cobertura report".to_string()));
    }
    Ok(collect_lines(files))
}

fn parse_lcov(content: &str) -> Result<Vec<FileCoverage>> {
    let mut files: BTreeMap<String, BTreeMap<u64, u64>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in content.lines().map(str::trim) {
        if let Some(path) = line.strip_prefix("SF:") {
            current = Some(path.to_string());
            files.entry(path.to_string()).or_default();
        } else if let Some(data) = line.strip_prefix("DA:") {
            let Some(path) = &current else {
                return Err(GenError::Coverage(format!("lcov DA record outside a file: {}", line)));
            };
            let mut fields = data.split(',');
            let number = fields.next().and_then(|n| n.trim().parse::<u64>().ok());
            let hits = fields.next().and_then(|h| h.trim().parse::<u64>().ok());
            if let (Some(number), Some(hits)) = (number, hits) {
                let lines = files.entry(path.clone()).or_default();
                let entry = lines.entry(number).or_insert(0);
                *entry = (*entry).max(hits);
            }
        } else if line == "end_of_record" {
            current = None;
        }
    }
    Ok(collect_lines(files))
}

fn parse_go(content: &str) -> Result<Vec<FileCoverage>> {
    let mut lines = content.lines();
    match lines.next() {
        Some(header) if header.starts_with("mode:") => {}
        _ => return Err(GenError::Coverage("go coverprofile is missing its mode line".to_string())),
    }

    // (file, block) -> (statements, count); blocks repeat across packages
    let mut blocks: BTreeMap<(String, String), (u64, u64)> = BTreeMap::new();
    for line in lines.map(str::trim).filter(|l| !l.is_empty()) {
        let Some(caps) = GO_BLOCK.captures(line) else {
            return Err(GenError::Coverage(format!("malformed coverprofile line: {}", line)));
        };
        let statements: u64 = caps[3].parse().unwrap_or(0);
        let count: u64 = caps[4].parse().unwrap_or(0);
        let entry = blocks
            .entry((caps[1].to_string(), caps[2].to_string()))
            .or_insert((statements, 0));
        entry.1 = entry.1.max(count);
    }

    let mut files: BTreeMap<String, FileCoverage> = BTreeMap::new();
    for ((path, _), (statements, count)) in blocks {
        let file = files.entry(path.clone()).or_insert(FileCoverage {
            path,
            covered: 0,
            total: 0,
        });
        file.total += statements;
        if count > 0 {
            file.covered += statements;
        }
    }
    Ok(files.into_values().collect())
}

//! Coverage state and report processing

pub mod formats;

pub use formats::{FileCoverage, ReportFormat};

use crate::error::{GenError, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

/// What the generator knows about coverage for the file being worked on
#[derive(Debug, Clone)]
pub struct CoverageState {
    pub report_path: PathBuf,
    pub report_format: ReportFormat,
    /// Target in percent (0..=100)
    pub desired_percent: f64,
    /// Last measured coverage as a fraction (0..=1)
    pub current: f64,
    pub report_content: String,
    pub discovered_files: Vec<String>,
}

impl CoverageState {
    pub fn new(report_path: PathBuf, report_format: ReportFormat, desired_percent: f64) -> Self {
        Self {
            report_path,
            report_format,
            desired_percent,
            current: 0.0,
            report_content: String::new(),
            discovered_files: Vec::new(),
        }
    }

    pub fn desired_fraction(&self) -> f64 {
        self.desired_percent / 100.0
    }

    pub fn goal_reached(&self) -> bool {
        self.current >= self.desired_fraction()
    }

    /// Take the numbers from a fresh report
    pub fn apply(&mut self, report: CoverageReport) {
        self.current = report.coverage;
        self.report_content = report.content;
        self.discovered_files = report.files;
    }

    pub fn current_percent(&self) -> f64 {
        (self.current * 100.0).round()
    }
}

/// Result of reading one coverage report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageReport {
    pub coverage: f64,
    pub content: String,
    /// Files below full coverage, filled only when no target file was given
    pub files: Vec<String>,
}

pub trait CoverageProcessor: Send + Sync {
    /// Read the report produced by a test run that started at `since`.
    ///
    /// With a target file name, coverage is that file's ratio; without one it
    /// is the whole report's and `files` lists the candidates for discovery.
    fn process(&self, target_file: Option<&str>, since: DateTime<Utc>) -> Result<CoverageReport>;
}

/// Reads a report file from disk
pub struct ReportProcessor {
    path: PathBuf,
    format: ReportFormat,
}

impl ReportProcessor {
    pub fn new(path: impl Into<PathBuf>, format: ReportFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_fresh(&self, since: DateTime<Utc>) -> Result<()> {
        let modified = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|e| GenError::io("failed to stat coverage report", &self.path, e))?;
        let modified: DateTime<Utc> = modified.into();
        if modified < since {
            return Err(GenError::Coverage(format!(
                "report '{}' was not updated by the last test run (modified {}, run started {})",
                self.path.display(),
                modified.format("%H:%M:%S%.3f"),
                since.format("%H:%M:%S%.3f"),
            )));
        }
        Ok(())
    }
}

fn matches_target(path: &str, target: &str) -> bool {
    let target = target.trim_start_matches("./");
    path == target
        || path.ends_with(&format!("/{}", target))
        || Path::new(path).file_name().and_then(|n| n.to_str()) == Some(target)
}

/// Reduce parsed file entries to a coverage ratio and discovery list
pub fn summarize(files: &[FileCoverage], target_file: Option<&str>) -> (f64, Vec<String>) {
    match target_file {
        Some(target) => {
            let (covered, total) = files
                .iter()
                .filter(|f| matches_target(&f.path, target))
                .fold((0, 0), |(c, t), f| (c + f.covered, t + f.total));
            if total == 0 {
                tracing::debug!(target, "target file not present in coverage report");
                return (0.0, Vec::new());
            }
            (covered as f64 / total as f64, Vec::new())
        }
        None => {
            let (covered, total) = files
                .iter()
                .fold((0, 0), |(c, t), f| (c + f.covered, t + f.total));
            let ratio = if total == 0 { 0.0 } else { covered as f64 / total as f64 };
            let below: Vec<String> = files
                .iter()
                .filter(|f| f.total > 0 && f.covered < f.total)
                .map(|f| f.path.clone())
                .collect();
            (ratio, below)
        }
    }
}

impl CoverageProcessor for ReportProcessor {
    fn process(&self, target_file: Option<&str>, since: DateTime<Utc>) -> Result<CoverageReport> {
        self.check_fresh(since)?;
        let content = fs::read_to_string(&self.path)
            .map_err(|e| GenError::io("failed to read coverage report", &self.path, e))?;
        let files = formats::parse(self.format, &content)?;
        let (coverage, files) = summarize(&files, target_file);
        tracing::debug!(
            report = %self.path.display(),
            coverage,
            discovered = files.len(),
            "processed coverage report"
        );
        Ok(CoverageReport {
            coverage,
            content,
            files,
        })
    }
}

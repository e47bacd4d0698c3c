//! Configuration for covgen
//!
//! Settings come from an optional TOML file (`--config`, else `covgen.toml`
//! in the current directory, else `<config dir>/covgen/config.toml`) with
//! command-line values layered on top.

use crate::coverage::ReportFormat;
use crate::error::{GenError, Result};
use crate::lang::Language;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LOCAL_CONFIG_FILE: &str = "covgen.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenConfig {
    /// Source file to cover. Unset means: discover files from a coverage run
    pub source_file_path: Option<PathBuf>,
    /// Test file for `source_file_path`; derived from it when unset
    pub test_file_path: Option<PathBuf>,
    /// Command that runs the tests and writes the coverage report
    pub test_command: String,
    /// Directory test commands run in; new Python test files go here too
    pub test_dir: Option<PathBuf>,
    pub coverage_report_path: PathBuf,
    /// `cobertura`, `lcov`, `go` or `auto`
    pub coverage_format: String,
    /// Target coverage in percent
    pub desired_coverage: f64,
    pub max_iterations: u32,
    pub model: String,
    pub api_base_url: Option<String>,
    pub api_version: Option<String>,
    /// Extra instructions appended to every generation prompt
    pub additional_prompt: String,
    /// Override language detection from the source file extension
    pub language: Option<String>,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            source_file_path: None,
            test_file_path: None,
            test_command: String::new(),
            test_dir: None,
            coverage_report_path: PathBuf::from("coverage.xml"),
            coverage_format: "auto".to_string(),
            desired_coverage: 80.0,
            max_iterations: 5,
            model: "gpt-4o".to_string(),
            api_base_url: None,
            api_version: None,
            additional_prompt: String::new(),
            language: None,
        }
    }
}

/// Values given on the command line; `None` keeps the file value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source_file_path: Option<PathBuf>,
    pub test_file_path: Option<PathBuf>,
    pub test_command: Option<String>,
    pub test_dir: Option<PathBuf>,
    pub coverage_report_path: Option<PathBuf>,
    pub coverage_format: Option<String>,
    pub desired_coverage: Option<f64>,
    pub max_iterations: Option<u32>,
    pub model: Option<String>,
    pub api_base_url: Option<String>,
    pub api_version: Option<String>,
    pub additional_prompt: Option<String>,
    pub language: Option<String>,
}

impl GenConfig {
    /// Global config location
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("covgen").join("config.toml"))
    }

    /// Pick the config file to read: the explicit one must exist, the
    /// fallbacks are optional
    pub fn locate(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(GenError::Config(format!(
                    "config file '{}' does not exist",
                    path.display()
                )));
            }
            return Ok(Some(path.to_path_buf()));
        }
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.is_file() {
            return Ok(Some(local));
        }
        Ok(Self::user_config_path().filter(|p| p.is_file()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| GenError::io("failed to read config file", path, e))?;
        toml::from_str(&content).map_err(|e| {
            GenError::Config(format!("invalid config file '{}': {}", path.display(), e))
        })
    }

    /// Load from the located file (or defaults) and apply overrides
    pub fn load(explicit: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut config = match Self::locate(explicit)? {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config file");
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, o: Overrides) {
        if o.source_file_path.is_some() {
            self.source_file_path = o.source_file_path;
        }
        if o.test_file_path.is_some() {
            self.test_file_path = o.test_file_path;
        }
        if let Some(v) = o.test_command {
            self.test_command = v;
        }
        if o.test_dir.is_some() {
            self.test_dir = o.test_dir;
        }
        if let Some(v) = o.coverage_report_path {
            self.coverage_report_path = v;
        }
        if let Some(v) = o.coverage_format {
            self.coverage_format = v;
        }
        if let Some(v) = o.desired_coverage {
            self.desired_coverage = v;
        }
        if let Some(v) = o.max_iterations {
            self.max_iterations = v;
        }
        if let Some(v) = o.model {
            self.model = v;
        }
        if o.api_base_url.is_some() {
            self.api_base_url = o.api_base_url;
        }
        if o.api_version.is_some() {
            self.api_version = o.api_version;
        }
        if let Some(v) = o.additional_prompt {
            self.additional_prompt = v;
        }
        if o.language.is_some() {
            self.language = o.language;
        }
    }

    pub fn report_format(&self) -> Result<ReportFormat> {
        self.coverage_format.parse()
    }

    pub fn language_override(&self) -> Result<Option<Language>> {
        self.language
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.parse::<Language>())
            .transpose()
    }

    pub fn validate(&self) -> Result<()> {
        if self.test_command.trim().is_empty() {
            return Err(GenError::Config("test command is required".to_string()));
        }
        if self.coverage_report_path.as_os_str().is_empty() {
            return Err(GenError::Config("coverage report path is required".to_string()));
        }
        if !(self.desired_coverage > 0.0 && self.desired_coverage <= 100.0) {
            return Err(GenError::Config(format!(
                "desired coverage must be in (0, 100], got {}",
                self.desired_coverage
            )));
        }
        if self.max_iterations == 0 {
            return Err(GenError::Config("max iterations must be at least 1".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(GenError::Config("model is required".to_string()));
        }
        if self.test_file_path.is_some() && self.source_file_path.is_none() {
            return Err(GenError::Config(
                "a test file was given without a source file".to_string(),
            ));
        }
        self.report_format()?;
        self.language_override()?;
        Ok(())
    }

    /// Write this config as TOML, replacing `path` atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| GenError::io("failed to create config directory", dir, e))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| GenError::Config(format!("failed to serialize config: {}", e)))?;
        write_config_atomic(path, &content)
            .map_err(|e| GenError::io("failed to write config file", path, e))
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("toml.tmp");
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

//! In-memory collaborators for unit tests

use crate::coverage::{CoverageProcessor, CoverageReport};
use crate::error::{GenError, Result};
use crate::llm::{ModelClient, ModelResponse, Prompt};
use crate::runner::{CommandOutput, CommandRunner};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

fn output(exit_code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code,
        finished_at: Utc::now(),
        duration: Duration::from_millis(1),
    }
}

/// Runner that answers by command prefix and records every call.
/// Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Vec<(String, i32, String)>,
    /// Exit codes handed out in order for commands matching `sequence_prefix`
    sequence: Mutex<VecDeque<i32>>,
    sequence_prefix: String,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn respond(mut self, prefix: &str, exit_code: i32, stdout: &str) -> Self {
        self.responses
            .push((prefix.to_string(), exit_code, stdout.to_string()));
        self
    }

    /// Successive runs of `prefix` exit with `codes` in turn, then succeed
    pub fn sequence(mut self, prefix: &str, codes: &[i32]) -> Self {
        self.sequence_prefix = prefix.to_string();
        self.sequence = Mutex::new(codes.iter().copied().collect());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &str, _working_dir: Option<&Path>) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(command.to_string());
        if !self.sequence_prefix.is_empty() && command.starts_with(&self.sequence_prefix) {
            let code = self.sequence.lock().unwrap().pop_front().unwrap_or(0);
            return Ok(output(code, if code == 0 { "ok" } else { "FAIL: test_x\nAssertionError" }));
        }
        let (exit_code, stdout) = self
            .responses
            .iter()
            .find(|(prefix, _, _)| command.starts_with(prefix.as_str()))
            .map(|(_, code, out)| (*code, out.clone()))
            .unwrap_or((0, String::new()));
        Ok(output(exit_code, &stdout))
    }
}

/// Model that replays canned responses in order
#[derive(Default)]
pub struct FakeModel {
    responses: Mutex<VecDeque<String>>,
    repeat_last: Option<String>,
    prompts: Mutex<Vec<Prompt>>,
}

impl FakeModel {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    /// Answer every call with `response`
    pub fn always(response: &str) -> Self {
        Self {
            repeat_last: Some(response.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ModelClient for FakeModel {
    async fn call(&self, prompt: &Prompt, _max_tokens: u32) -> Result<ModelResponse> {
        self.prompts.lock().unwrap().push(prompt.clone());
        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat_last.clone())
            .ok_or_else(|| GenError::Model("no scripted response left".to_string()))?;
        Ok(ModelResponse {
            content,
            prompt_tokens: 10,
            completion_tokens: 5,
        })
    }

    fn model(&self) -> &str {
        "fake-model"
    }
}

/// Coverage processor that reports scripted fractions in order; the last
/// one repeats
pub struct FakeCoverage {
    values: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
    files: Vec<String>,
    calls: Mutex<Vec<Option<String>>>,
}

impl FakeCoverage {
    pub fn new(values: &[f64]) -> Self {
        Self {
            values: Mutex::new(values.iter().copied().collect()),
            last: Mutex::new(values.last().copied().unwrap_or(0.0)),
            files: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_files(mut self, files: &[&str]) -> Self {
        self.files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl CoverageProcessor for FakeCoverage {
    fn process(&self, target_file: Option<&str>, _since: DateTime<Utc>) -> Result<CoverageReport> {
        self.calls.lock().unwrap().push(target_file.map(str::to_string));
        let coverage = match self.values.lock().unwrap().pop_front() {
            Some(v) => {
                *self.last.lock().unwrap() = v;
                v
            }
            None => *self.last.lock().unwrap(),
        };
        Ok(CoverageReport {
            coverage,
            content: format!("<coverage line-rate=\"{}\"/>", coverage),
            files: if target_file.is_none() { self.files.clone() } else { Vec::new() },
        })
    }
}

//! Where new tests go in the test file
//!
//! The model is asked once per file for the indentation of a top-level test
//! and the line after which tests should be inserted. Each question gets a
//! bounded number of attempts.

use crate::error::{GenError, Result};
use crate::llm::parse::{parse_indentation, parse_insert_line};
use crate::llm::{ModelClient, PromptBuilder, PromptKind, MAX_TOKENS};
use tokio_util::sync::CancellationToken;

pub const MAX_ATTEMPTS: u32 = 3;

/// Insertion point for the next accepted test
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Tests are inserted after this many lines
    pub line: usize,
    /// Spaces in front of a test header
    pub indentation: usize,
}

impl Cursor {
    pub fn new(line: usize, indentation: usize) -> Self {
        Self { line, indentation }
    }

    /// Line to splice after in a file of `line_count` lines
    pub fn insertion_point(&self, line_count: usize) -> usize {
        self.line.min(line_count)
    }

    /// Move past `inserted` spliced lines plus whatever the import merge
    /// added above, staying inside a file of `line_count` lines
    pub fn advance(&mut self, inserted: usize, import_delta: isize, line_count: usize) {
        let base = self.line.min(line_count) + inserted;
        let next = base as isize + import_delta;
        self.line = next.clamp(0, line_count as isize) as usize;
    }
}

async fn resolve_value(
    model: &dyn ModelClient,
    prompts: &PromptBuilder,
    kind: PromptKind,
    what: &'static str,
    parse: fn(&str) -> Result<i64>,
    cancel: &CancellationToken,
) -> Result<usize> {
    for attempt in 1..=MAX_ATTEMPTS {
        if cancel.is_cancelled() {
            return Err(GenError::Cancelled);
        }
        let prompt = prompts.build(kind, "")?;
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(GenError::Cancelled),
            response = model.call(&prompt, MAX_TOKENS) => response?,
        };

        match parse(&response.content) {
            Ok(value) if value >= 0 => return Ok(value as usize),
            Ok(value) => tracing::debug!(what, attempt, value, "model could not determine value"),
            Err(err) => tracing::warn!(what, attempt, error = %err, "unusable model answer"),
        }
    }
    Err(GenError::CursorResolution {
        what,
        attempts: MAX_ATTEMPTS,
    })
}

pub async fn resolve_indentation(
    model: &dyn ModelClient,
    prompts: &PromptBuilder,
    cancel: &CancellationToken,
) -> Result<usize> {
    resolve_value(
        model,
        prompts,
        PromptKind::Indentation,
        "test headers indentation",
        parse_indentation,
        cancel,
    )
    .await
}

pub async fn resolve_insert_line(
    model: &dyn ModelClient,
    prompts: &PromptBuilder,
    cancel: &CancellationToken,
) -> Result<usize> {
    resolve_value(
        model,
        prompts,
        PromptKind::InsertLine,
        "relevant line number to insert new tests",
        parse_insert_line,
        cancel,
    )
    .await
}

/// Ask for both values; indentation first
pub async fn resolve(
    model: &dyn ModelClient,
    prompts: &PromptBuilder,
    cancel: &CancellationToken,
) -> Result<Cursor> {
    tracing::info!("getting indentation for new tests");
    let indentation = resolve_indentation(model, prompts, cancel).await?;
    tracing::info!("getting line number for new tests");
    let line = resolve_insert_line(model, prompts, cancel).await?;
    Ok(Cursor { line, indentation })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Language;
    use crate::test_support::FakeModel;
    use std::fs;

    fn prompts(tmp: &tempfile::TempDir) -> PromptBuilder {
        let src = tmp.path().join("calc.go");
        let test = tmp.path().join("calc_test.go");
        fs::write(&src, "package calc\n").unwrap();
        fs::write(&test, "package calc\n\nfunc TestA(t *testing.T) {}\n").unwrap();
        PromptBuilder::new(src, test, Language::Go, "", "")
    }

    #[tokio::test]
    async fn test_sentinel_exhausts_after_three_calls() {
        let tmp = tempfile::TempDir::new().unwrap();
        let model = FakeModel::always("test_headers_indentation: -1");
        let err = resolve_indentation(&model, &prompts(&tmp), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenError::CursorResolution { attempts: 3, .. }));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_until_valid() {
        let tmp = tempfile::TempDir::new().unwrap();
        let model = FakeModel::new(&[
            "relevant_line_number_to_insert_tests_after: -1",
            "not yaml: [",
            "relevant_line_number_to_insert_tests_after: \"3\"",
        ]);
        let line = resolve_insert_line(&model, &prompts(&tmp), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(line, 3);
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_resolve_both() {
        let tmp = tempfile::TempDir::new().unwrap();
        let model = FakeModel::new(&[
            "test_headers_indentation: 0",
            "relevant_line_number_to_insert_tests_after: 3",
        ]);
        let cursor = resolve(&model, &prompts(&tmp), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(cursor, Cursor::new(3, 0));
        assert!(model.prompts()[0].system.contains("test_headers_indentation"));
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let tmp = tempfile::TempDir::new().unwrap();
        let model = FakeModel::always("test_headers_indentation: 4");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = resolve(&model, &prompts(&tmp), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_advance_clamps() {
        let mut cursor = Cursor::new(10, 4);
        cursor.advance(5, 2, 100);
        assert_eq!(cursor.line, 17);

        let mut cursor = Cursor::new(50, 0);
        cursor.advance(4, 0, 20);
        assert_eq!(cursor.line, 20);

        let mut cursor = Cursor::new(2, 0);
        cursor.advance(1, -10, 30);
        assert_eq!(cursor.line, 0);
    }
}

//! Decoding model responses
//!
//! Models are asked for YAML. What comes back is usually YAML wrapped in a
//! markdown fence, sometimes with list-valued fields where text was asked
//! for, and integers that arrive quoted.

use crate::error::{GenError, Result};
use crate::util::truncate;
use crate::validate::Candidate;
use serde::Deserialize;

/// Strip a leading ```yaml / ``` fence and a trailing ``` fence
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = match trimmed.strip_prefix("```") {
        Some(rest) => {
            // drop the info string (`yaml`, `yml`, ...)
            match rest.find('\n') {
                Some(nl) if !rest[..nl].trim().contains(' ') => &rest[nl + 1..],
                _ => rest,
            }
        }
        None => trimmed,
    };
    let clean = clean.trim_end();
    clean.strip_suffix("```").unwrap_or(clean).trim_matches('\n')
}

/// Text field that may come back as a YAML list of lines
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextOrLines {
    Text(String),
    Lines(Vec<String>),
}

fn text_or_lines<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<TextOrLines>::deserialize(deserializer)? {
        Some(TextOrLines::Text(text)) => text,
        Some(TextOrLines::Lines(lines)) => lines.join("\n"),
        None => String::new(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IntOrText {
    Int(i64),
    Text(String),
}

impl IntOrText {
    fn to_int(&self, field: &str) -> Result<i64> {
        match self {
            IntOrText::Int(v) => Ok(*v),
            IntOrText::Text(s) => s.trim().parse::<i64>().map_err(|_| {
                GenError::Parse(format!("{} is not an integer: '{}'", field, truncate(s, 40)))
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(default, deserialize_with = "text_or_lines")]
    test_behavior: String,
    #[serde(default, deserialize_with = "text_or_lines")]
    test_name: String,
    #[serde(default, deserialize_with = "text_or_lines")]
    test_code: String,
    #[serde(default, deserialize_with = "text_or_lines")]
    new_imports_code: String,
    #[serde(default, deserialize_with = "text_or_lines")]
    library_installation_code: String,
}

#[derive(Debug, Deserialize)]
struct GeneratedTests {
    #[serde(default)]
    new_tests: Vec<RawCandidate>,
}

#[derive(Debug, Deserialize)]
struct IndentationAnswer {
    test_headers_indentation: Option<IntOrText>,
}

#[derive(Debug, Deserialize)]
struct InsertLineAnswer {
    relevant_line_number_to_insert_tests_after: Option<IntOrText>,
}

fn decode<T: for<'de> Deserialize<'de>>(response: &str) -> Result<T> {
    let yaml = strip_markdown_fences(response);
    serde_yaml::from_str(yaml).map_err(|e| {
        GenError::Parse(format!("{} (response: {})", e, truncate(yaml, 200)))
    })
}

/// Decode a test-generation response. Entries without code are dropped.
pub fn parse_candidates(response: &str) -> Result<Vec<Candidate>> {
    let parsed: GeneratedTests = decode(response)?;
    Ok(parsed
        .new_tests
        .into_iter()
        .filter(|raw| !raw.test_code.trim().is_empty())
        .map(|raw| Candidate {
            test_name: raw.test_name.trim().to_string(),
            test_behavior: raw.test_behavior.trim().to_string(),
            test_code: raw.test_code,
            new_imports_code: raw.new_imports_code,
            library_installation_code: raw.library_installation_code,
        })
        .collect())
}

pub fn parse_indentation(response: &str) -> Result<i64> {
    let answer: IndentationAnswer = decode(response)?;
    answer
        .test_headers_indentation
        .ok_or_else(|| GenError::Parse("missing test_headers_indentation".to_string()))?
        .to_int("test_headers_indentation")
}

pub fn parse_insert_line(response: &str) -> Result<i64> {
    let answer: InsertLineAnswer = decode(response)?;
    answer
        .relevant_line_number_to_insert_tests_after
        .ok_or_else(|| {
            GenError::Parse("missing relevant_line_number_to_insert_tests_after".to_string())
        })?
        .to_int("relevant_line_number_to_insert_tests_after")
}

//! covgen library crate
//!
//! Raises a file's test coverage by asking a model for tests, inserting each
//! one, and keeping it only when it passes repeatedly and coverage goes up.

pub mod config;
pub mod coverage;
pub mod cursor;
pub mod error;
pub mod generator;
pub mod injector;
pub mod lang;
pub mod llm;
pub mod paths;
pub mod report;
pub mod runner;
pub mod ticker;
pub mod util;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_support;

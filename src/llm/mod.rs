//! Model access: HTTP client, prompt templates and response decoding

pub mod client;
pub mod parse;
pub mod prompts;

pub use client::{ChatClient, ModelClient, ModelResponse, Prompt};
pub use prompts::{PromptBuilder, PromptKind};

/// Token budget for every model call
pub const MAX_TOKENS: u32 = 4096;

//! Challenge generation and solution review backed by Google's Gemini models.

pub mod client;
pub mod prompts;
pub mod provider;

pub use client::GeminiClient;
pub use provider::GeminiProvider;

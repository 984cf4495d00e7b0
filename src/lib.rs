//! Verifies JavaScript solutions to coding challenges against ordered test
//! suites, and talks to an AI model to author challenges and review
//! solutions.

pub mod boa;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod core;
pub mod gemini;
pub mod storage;
pub mod stubs;

//! LLM adapter for Mito-Forge.
//!
//! Provides the `ProviderAdapter` trait, `DynProvider` wrapper, an
//! OpenAI-compatible HTTP adapter, a scripted adapter for offline use, and
//! `LlmClient` with `generate_text` / `generate_json` (bounded retries, schema
//! validation). LLM failures never abort a pipeline; callers fall back.

mod client;
mod openai;
mod provider;
pub mod retry;
pub mod schema;
mod scripted;
mod types;

pub use client::*;
pub use openai::OpenAiCompatAdapter;
pub use provider::*;
pub use schema::{FieldKind, ResponseSchema};
pub use scripted::ScriptedProvider;
pub use types::*;

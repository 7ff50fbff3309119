//! # quill-llm
//!
//! LLM provider adapters behind one trait.
//!
//! Every backend ([`openai_chat`], [`openai_responses`], [`google`],
//! [`anthropic`]) implements [`provider::Provider`], translating a neutral
//! [`provider::ChatRequest`] into its own wire protocol and mapping the
//! provider's SSE stream into the shared normalized
//! [`quill_core::events::StreamEvent`] sequence. Provider-specific field
//! names never leak past this crate.
//!
//! Shared machinery:
//! - [`sse`] — SSE line framing (`data: ` prefix, `[DONE]`, partial-line
//!   buffering)
//! - [`accumulate`] — merging indexed tool-call argument fragments
//! - [`retry`] — exponential-backoff stream retry for the caller (the
//!   adapters themselves never retry)

#![deny(unsafe_code)]

pub mod accumulate;
pub mod anthropic;
pub mod google;
pub mod openai_chat;
pub mod openai_responses;
pub(crate) mod pipeline;
pub mod provider;
pub mod retry;
pub mod sse;

pub use provider::{ChatRequest, EventStream, Provider, ProviderError, ProviderResult};

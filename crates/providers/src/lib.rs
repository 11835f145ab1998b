//! LLM provider implementations for stepwise.
//!
//! All providers implement the `stepwise_core::Provider` trait.
//! The router selects the endpoint from a litellm-style model name.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{KNOWN_PROVIDERS, KnownProvider, ModelRef, build_provider, build_provider_with};

//! Structured record extraction through an LLM provider.
//!
//! The client builds a prompt embedding the field schema, sends it through an
//! [`LlmTransport`], classifies the reply status and parses the generated
//! text into [`ExtractionRecord`]s.

mod client;
mod parse;
mod prompt;
mod record;
mod transport;

pub use client::{classify_reply, ExtractionClient, DEFAULT_EXTRACTION_TIMEOUT_SECS};
pub use parse::parse_records;
pub use prompt::{extraction_prompt, DEFAULT_SYSTEM_PROMPT};
pub use record::{ExtractionRecord, FieldSet};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{parse_retry_after, LlmTransport, ProviderReply};

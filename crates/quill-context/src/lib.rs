//! # quill-context
//!
//! Structure-preserving context compression. [`split`] finds a cut index
//! that never orphans a tool result from its originating assistant call;
//! [`compressor`] replaces the head partition with a compact-model
//! summary while returning the tail verbatim for the caller to splice
//! back.

#![deny(unsafe_code)]

pub mod compressor;
pub mod split;

pub use compressor::{
    CompressionError, Compression, ContextCompressor, ProviderSummarizer, Summarizer,
    SummaryResult, rebuild,
};
pub use split::find_split_point;

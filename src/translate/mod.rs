//! API translation between the OpenAI dialect and the upstream gateway dialect.
//!
//! Requests go out through [`request`], complete responses come back through
//! [`response`], and streamed responses pass line by line through [`sse`] and
//! [`streaming`]. All translation functions are pure (no I/O).

pub mod openai_types;
pub mod request;
pub mod response;
pub mod sse;
pub mod streaming;
pub mod upstream_types;

//! LLM 接入层
//!
//! transport 负责 HTTP 细节，client 负责重试与回复解释，
//! types 是两者共享的数据定义。

pub mod client;
pub mod transport;
pub mod types;

pub use client::{GenerationClient, RateLimiter, RetryPolicy};
pub use transport::{ChatCompletion, ChatTransport, HttpTransport};
pub use types::{GenerationResult, GenerationStatus, ModelConfig};

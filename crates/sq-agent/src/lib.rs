//! sshq agent: answers natural-language questions about SSH auth logs.
//!
//! Re-exports all modules so the binary and `sq-e2e-tests` can reach the
//! agent, the model client and the service.

pub mod agent;
pub mod answer;
pub mod config;
pub mod llm;
pub mod prompt;
pub mod service;

pub use agent::{AgentSettings, QueryAgent, QuerySession};
pub use answer::{AnswerRecord, AnswerStatus, DegradeReason, ParsedAnswer, ToolTrace, parse_answer};
pub use config::ServiceConfig;
pub use llm::{ChatMessage, ChatModel, ModelError, ModelTurn, OllamaClient, OllamaConfig, Role, ToolCall, ToolSpec};
pub use service::QueryService;

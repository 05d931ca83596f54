//! One façade for all LLM traffic (§4.4): a [`LlmGateway`] dispatches a
//! `[<provider>:]<model>` string to one of several [`Provider`]
//! backends, tracks token usage and cost, and falls over to a secondary
//! model on primary-provider failure.

mod anthropic;
mod gateway;
mod local;
#[cfg(test)]
pub mod mock;
mod openai;
mod provider;
mod token_tracker;
mod types;

pub use gateway::LlmGateway;
pub use provider::{ModelRef, Provider};
pub use token_tracker::{CostTable, TokenTracker, UsageTotals};
pub use types::{ChatParams, ChatResponse, EmbedResponse, Message, Role, Usage};

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Shared types and capability traits used across the gateway crates.
//!
//! A small set of message types plus one capability trait per external
//! concern (here, the AI oracle).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A single capability: ask the oracle a question and get back raw text.
///
/// Deliberately narrow — no tool-calling, no embeddings, no session
/// storage. Bots never depend on oracle wire details; they depend on
/// this trait.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn ask(
        &self,
        system_prompt: &str,
        user_message: &str,
        model: &str,
        max_tokens: u32,
    ) -> anyhow::Result<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("not found")]
    NotFound,
    #[error("invalid link token: {0}")]
    InvalidLinkToken(String),
    #[error("database error: {0}")]
    Db(#[from] anyhow::Error),
}

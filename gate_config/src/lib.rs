#![allow(clippy::missing_errors_doc)]

//! Environment-variable configuration loader.
//!
//! Fail-fast style (`anyhow::bail!` naming exactly which value is missing),
//! reading from the process environment rather than a dotfile — this
//! gateway runs as a server process, not a developer CLI tool.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotId {
    Interpreter,
    Conceptualizer,
    Simulator,
    Screen,
    Pro,
}

impl BotId {
    pub const ALL: [Self; 5] = [
        Self::Interpreter,
        Self::Conceptualizer,
        Self::Simulator,
        Self::Screen,
        Self::Pro,
    ];

    /// Matches the literal `bot_id` used in the webhook path, in
    /// `gate_bots::*::BOT_ID`, and as `service_id` in the link-token/artifact
    /// stores — these three must never drift apart.
    pub const fn path_segment(self) -> &'static str {
        match self {
            Self::Interpreter => "interpretator",
            Self::Conceptualizer => "conceptualizator",
            Self::Simulator => "simulator",
            Self::Screen => "screen",
            Self::Pro => "pro",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.path_segment() == segment)
    }

    const fn env_suffix(self) -> &'static str {
        match self {
            Self::Interpreter => "INTERPRETATOR",
            Self::Conceptualizer => "CONCEPTUALIZATOR",
            Self::Simulator => "SIMULATOR",
            Self::Screen => "SCREEN",
            Self::Pro => "PRO",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BotCredentials {
    pub token: String,
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_url_migrate: String,
    pub ai_oracle_api_key: String,
    pub ai_oracle_base_url: String,
    pub bots: HashMap<BotId, BotCredentials>,
    pub public_base_url: String,
    pub telemetry_dsn: Option<String>,
    pub debug: bool,
    pub bind_addr: String,
    pub db_pool_max: u32,
    pub db_pool_min: u32,
}

fn require(name: &str) -> anyhow::Result<String> {
    std::env::var(name)
        .map_err(|_| anyhow::anyhow!("missing required environment variable: {name}"))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = require("DATABASE_URL")?;
        let database_url_migrate =
            optional("DATABASE_URL_MIGRATE").unwrap_or_else(|| database_url.clone());

        let ai_oracle_api_key = require("AI_ORACLE_API_KEY")?;
        let ai_oracle_base_url = require("AI_ORACLE_BASE_URL")?;

        let mut bots = HashMap::new();
        for bot_id in BotId::ALL {
            let suffix = bot_id.env_suffix();
            let token = require(&format!("TELEGRAM_TOKEN_{suffix}"))?;
            let secret = require(&format!("TELEGRAM_SECRET_{suffix}"))?;
            bots.insert(bot_id, BotCredentials { token, secret });
        }

        let public_base_url = require("PUBLIC_BASE_URL")?;
        let telemetry_dsn = optional("TELEMETRY_DSN");

        let debug = optional("DEBUG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let bind_addr = optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let db_pool_max = optional("DB_POOL_MAX")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(10);
        let db_pool_min = optional("DB_POOL_MIN")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(5);

        Ok(Self {
            database_url,
            database_url_migrate,
            ai_oracle_api_key,
            ai_oracle_base_url,
            bots,
            public_base_url,
            telemetry_dsn,
            debug,
            bind_addr,
            db_pool_max,
            db_pool_min,
        })
    }

    pub fn credentials(&self, bot_id: BotId) -> anyhow::Result<&BotCredentials> {
        self.bots
            .get(&bot_id)
            .ok_or_else(|| anyhow::anyhow!("no credentials loaded for bot {bot_id:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::BotId;

    #[test]
    fn path_segment_round_trips_through_from_path_segment() {
        for bot_id in BotId::ALL {
            assert_eq!(BotId::from_path_segment(bot_id.path_segment()), Some(bot_id));
        }
    }

    #[test]
    fn path_segments_use_the_transliterated_service_ids() {
        assert_eq!(BotId::Interpreter.path_segment(), "interpretator");
        assert_eq!(BotId::Conceptualizer.path_segment(), "conceptualizator");
    }

    #[test]
    fn from_path_segment_rejects_unknown_values() {
        assert_eq!(BotId::from_path_segment("not_a_bot"), None);
    }

    #[test]
    fn from_path_segment_rejects_english_names() {
        assert_eq!(BotId::from_path_segment("interpreter"), None);
    }
}

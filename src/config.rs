//! Process configuration read from the environment (and `.env` via dotenv).

use crate::agent::RouterConfig;
use crate::error::AssistantError;
use crate::gemini::DEFAULT_MODEL;
use crate::store::session::{DEFAULT_SESSION_CAPACITY, DEFAULT_SESSION_IDLE};
use crate::voice::token::{DEFAULT_ROOM_PREFIX, DEFAULT_TOKEN_TTL_SECS};
use crate::voice::{LiveKitConfig, VoiceConfig};
use crate::Result;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Empty disables the Gemini planner and categorizer.
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub livekit: LiveKitConfig,
    pub max_upload_bytes: usize,
    pub analysis_budget: Duration,
    pub voice_response_budget: Duration,
    pub session_capacity: usize,
    pub session_idle: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gemini_key = if self.gemini_api_key.is_empty() { "" } else { "[REDACTED]" };
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("gemini_api_key", &gemini_key)
            .field("gemini_model", &self.gemini_model)
            .field("livekit", &self.livekit)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("analysis_budget", &self.analysis_budget)
            .field("voice_response_budget", &self.voice_response_budget)
            .field("session_capacity", &self.session_capacity)
            .field("session_idle", &self.session_idle)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => parse_value("PORT", &raw)?,
            None => DEFAULT_PORT,
        };

        let livekit = LiveKitConfig {
            url: get("LIVEKIT_URL").unwrap_or_default(),
            api_key: get("LIVEKIT_API_KEY").unwrap_or_default(),
            api_secret: get("LIVEKIT_API_SECRET").unwrap_or_default(),
            room_prefix: get("LIVEKIT_ROOM_PREFIX").unwrap_or_else(|| DEFAULT_ROOM_PREFIX.to_string()),
            token_ttl_secs: parse_or(&get, "LIVEKIT_TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS)?,
        };

        let analysis_ms: u64 = parse_or(&get, "ANALYSIS_BUDGET_MS", 5000)?;
        let voice_ms: u64 = parse_or(&get, "VOICE_RESPONSE_BUDGET_MS", 1500)?;
        let session_capacity: usize = parse_or(&get, "SESSION_CAPACITY", DEFAULT_SESSION_CAPACITY)?;
        let session_idle_secs: u64 = parse_or(&get, "SESSION_IDLE_SECS", DEFAULT_SESSION_IDLE.as_secs())?;
        if session_capacity == 0 {
            return Err(AssistantError::ConfigError(
                "SESSION_CAPACITY must be greater than zero".to_string(),
            ));
        }
        if analysis_ms == 0 || voice_ms == 0 {
            return Err(AssistantError::ConfigError(
                "time budgets must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            port,
            gemini_api_key: get("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            livekit,
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            analysis_budget: Duration::from_millis(analysis_ms),
            voice_response_budget: Duration::from_millis(voice_ms),
            session_capacity,
            session_idle: Duration::from_secs(session_idle_secs),
        })
    }

    pub fn has_gemini(&self) -> bool {
        !self.gemini_api_key.is_empty()
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            execution_budget: self.analysis_budget,
            reference_date: None,
        }
    }

    pub fn voice_config(&self) -> VoiceConfig {
        VoiceConfig {
            response_budget: self.voice_response_budget,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| AssistantError::ConfigError(format!("{} has an invalid value: {:?}", key, raw)))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

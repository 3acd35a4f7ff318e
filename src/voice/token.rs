//! LiveKit join tokens scoped to one session's room.

use crate::error::AssistantError;
use crate::Result;
use livekit_api::access_token::{AccessToken, VideoGrants};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_ROOM_PREFIX: &str = "budget-planner";
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

#[derive(Clone)]
pub struct LiveKitConfig {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
    pub room_prefix: String,
    pub token_ttl_secs: u64,
}

impl Default for LiveKitConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            room_prefix: DEFAULT_ROOM_PREFIX.to_string(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

impl fmt::Debug for LiveKitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveKitConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("room_prefix", &self.room_prefix)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

impl LiveKitConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
            && !self.api_key.trim().is_empty()
            && !self.api_secret.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub url: String,
    pub room: String,
    pub participant: String,
}

pub struct TokenIssuer {
    config: LiveKitConfig,
}

impl TokenIssuer {
    pub fn new(config: LiveKitConfig) -> Self {
        Self { config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// The only room a session's token may join.
    pub fn room_for(&self, session_id: Uuid) -> String {
        format!("{}-{}", self.config.room_prefix, session_id)
    }

    pub fn issue(&self, session_id: Uuid, participant: Option<&str>) -> Result<IssuedToken> {
        if !self.is_configured() {
            return Err(AssistantError::ConfigError(
                "LiveKit credentials are not configured".to_string(),
            ));
        }

        let room = self.room_for(session_id);
        let participant = match participant.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("user-{}", &session_id.simple().to_string()[..8]),
        };

        let grants = VideoGrants {
            room_join: true,
            room: room.clone(),
            can_publish: true,
            can_subscribe: true,
            can_publish_data: true,
            ..Default::default()
        };

        let token = AccessToken::with_api_key(&self.config.api_key, &self.config.api_secret)
            .with_identity(&participant)
            .with_name(&participant)
            .with_grants(grants)
            .with_ttl(Duration::from_secs(self.config.token_ttl_secs))
            .to_jwt()?;

        info!(session_id = %session_id, room = %room, "Issued voice room token");

        Ok(IssuedToken {
            token,
            url: self.config.url.clone(),
            room,
            participant,
        })
    }
}

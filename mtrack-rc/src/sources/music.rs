//! Spotify recently-played client
//!
//! Uses the refresh-token grant to obtain an access token, caches it until
//! shortly before it expires, then reads the listening history from
//! `GET {api_base}/me/player/recently-played`.
//!
//! The provider may hand back a new refresh token with any grant. The new
//! token replaces the old one in memory and, when the settings came from a
//! TOML file, is written back to that file so a restart keeps working.
//!
//! # API Reference
//! - Token endpoint: https://accounts.spotify.com/api/token
//! - History: https://developer.spotify.com/documentation/web-api/reference/get-recently-played

use super::{decode_records, MediaSource, Snapshot, SourceError};
use crate::config::MusicSettings;
use mtrack_common::config::{load_toml_config, write_toml_config};
use crate::models::{item::lenient_timestamp, MediaKind, RawItem, RawTrack, WatermarkMode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Watermark key for this source
pub const SOURCE_NAME: &str = "music";

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Maximum page size the history endpoint accepts
const HISTORY_LIMIT: u32 = 50;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Refresh this long before the provider's stated expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecentlyPlayed {
    /// Decoded one by one so a single odd entry cannot sink the page
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct PlayHistory {
    #[serde(default)]
    track: Option<TrackObject>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    played_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    artists: Vec<ArtistObject>,
}

#[derive(Debug, Deserialize)]
struct ArtistObject {
    #[serde(default)]
    name: Option<String>,
}

impl From<PlayHistory> for RawTrack {
    fn from(entry: PlayHistory) -> Self {
        let (track, artist) = match entry.track {
            Some(track) => {
                let artists: Vec<String> = track
                    .artists
                    .into_iter()
                    .filter_map(|a| a.name)
                    .filter(|n| !n.trim().is_empty())
                    .collect();
                let artist = (!artists.is_empty()).then(|| artists.join(", "));
                (track.name, artist)
            }
            None => (None, None),
        };

        RawTrack {
            track,
            artist,
            played_at: entry.played_at,
        }
    }
}

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

struct TokenState {
    access: Option<AccessToken>,
    refresh_token: String,
}

/// Write a rotated refresh token into the TOML config, keeping everything else
fn persist_refresh_token(path: &Path, refresh_token: &str) -> mtrack_common::Result<()> {
    let mut config = load_toml_config(path)?;
    config.music.refresh_token = Some(refresh_token.to_string());
    write_toml_config(&config, path)
}

/// Spotify Web API client for listening history
pub struct SpotifyClient {
    http_client: Client,
    settings: MusicSettings,
    token: Mutex<TokenState>,
}

impl SpotifyClient {
    pub fn new(settings: MusicSettings) -> Result<Self, SourceError> {
        let http_client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let token = Mutex::new(TokenState {
            access: None,
            refresh_token: settings.refresh_token.clone(),
        });

        Ok(Self {
            http_client,
            settings,
            token,
        })
    }

    /// Return a cached access token or obtain a fresh one
    async fn access_token(&self) -> Result<String, SourceError> {
        let mut state = self.token.lock().await;

        if let Some(token) = state.access.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http_client
            .post(&self.settings.token_url)
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", state.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Network(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Auth(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("token response: {}", e)))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        info!(expires_in = token.expires_in, "Obtained Spotify access token");

        state.access = Some(AccessToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        if let Some(rotated) = token.refresh_token.filter(|t| *t != state.refresh_token) {
            info!("Spotify rotated the refresh token");
            if let Some(path) = &self.settings.config_path {
                match persist_refresh_token(path, &rotated) {
                    Ok(()) => info!("Refresh token saved to {}", path.display()),
                    Err(e) => warn!(
                        error = %e,
                        "Failed to save rotated refresh token to {}; it is kept for this run only",
                        path.display()
                    ),
                }
            }
            state.refresh_token = rotated;
        }

        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        self.token.lock().await.access = None;
    }

    /// Fetch the most recent plays
    pub async fn recently_played(&self) -> Result<Vec<RawTrack>, SourceError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/me/player/recently-played?limit={}",
            self.settings.api_base.trim_end_matches('/'),
            HISTORY_LIMIT
        );

        debug!(url = %url, "Querying Spotify listening history");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = response.status();
        if status == 401 {
            // Token revoked early; the next pull starts from a fresh grant
            warn!("Spotify rejected the access token, dropping cached token");
            self.invalidate_token().await;
            return Err(SourceError::Auth("access token rejected".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let history: RecentlyPlayed = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;

        Ok(decode_records::<PlayHistory>(SOURCE_NAME, history.items)
            .into_iter()
            .map(RawTrack::from)
            .collect())
    }
}

#[async_trait]
impl MediaSource for SpotifyClient {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Music
    }

    fn watermark_mode(&self) -> WatermarkMode {
        WatermarkMode::Scalar
    }

    async fn pull(&self) -> Result<Snapshot, SourceError> {
        let captured_at = Utc::now();
        let tracks = self.recently_played().await?;

        debug!(tracks = tracks.len(), "Spotify history fetched");

        Ok(Snapshot::new(
            tracks.into_iter().map(RawItem::Track).collect(),
            captured_at,
        ))
    }
}

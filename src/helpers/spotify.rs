// Spotify Web API session for songfetch
// This module provides an authenticated session using the OAuth2
// client-credentials flow, plus the two endpoints the operations need:
// track search and batched audio features.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{debug, error, info};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::Credentials;
use crate::helpers::http_client::{new_http_client, HttpClient, HttpClientError};

const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";

// Refresh the token when it would expire within this margin
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

/// Upstream ceiling on ids per audio-features request
pub const AUDIO_FEATURES_MAX_IDS: usize = 100;

// Spotify API error types
#[derive(Error, Debug)]
pub enum SpotifyError {
    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("No catalog match: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SpotifyError>;

fn map_http_error(e: HttpClientError) -> SpotifyError {
    match e {
        HttpClientError::ServerError(msg) if msg.contains("HTTP 401") || msg.contains("HTTP 403") => {
            SpotifyError::AuthError(msg)
        }
        other => SpotifyError::ApiError(other.to_string()),
    }
}

// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    token_type: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: u64, // Unix timestamp when the token expires
}

/// One track candidate from the search endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artist {
    #[allow(dead_code)]
    pub id: Option<String>,
    pub name: String,
}

impl Track {
    /// Name of the primary (first-listed) artist, if any.
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists.first().map(|a| a.name.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: TrackPage,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    items: Vec<Track>,
}

#[derive(Debug, Deserialize)]
struct AudioFeaturesResponse {
    audio_features: Vec<Option<Map<String, Value>>>,
}

/// An authenticated Spotify session.
///
/// Constructed once and passed to each operation; the access token obtained
/// through the client-credentials handshake is cached and renewed when it is
/// about to expire, so repeated calls don't re-authenticate.
#[derive(Debug)]
pub struct Spotify {
    credentials: Credentials,
    http: Box<dyn HttpClient>,
    token: Mutex<Option<CachedToken>>,
}

impl Spotify {
    /// Create a session with the default HTTP client.
    pub fn new(credentials: Credentials) -> Self {
        Self::with_http_client(credentials, new_http_client(10))
    }

    /// Create a session with a custom HTTP client (used by tests).
    pub fn with_http_client(credentials: Credentials, http: Box<dyn HttpClient>) -> Self {
        Spotify {
            credentials,
            http,
            token: Mutex::new(None),
        }
    }

    fn now_unix() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Perform the client-credentials handshake and return a fresh token.
    fn request_token(&self) -> Result<CachedToken> {
        let basic = BASE64.encode(format!(
            "{}:{}",
            self.credentials.client_id, self.credentials.client_secret
        ));
        let auth_header = format!("Basic {}", basic);
        let headers = [("Authorization", auth_header.as_str())];
        let form = [("grant_type", "client_credentials")];

        info!("Requesting Spotify access token");
        let response = self
            .http
            .post_form_with_headers(SPOTIFY_TOKEN_URL, &form, &headers)
            .map_err(|e| {
                error!("Token request failed: {}", e);
                SpotifyError::AuthError(format!("Token request failed: {}", e))
            })?;

        let token_response: TokenResponse = serde_json::from_value(response)?;
        let expires_at = Self::now_unix() + token_response.expires_in;
        debug!("Access token obtained, expires in {} seconds", token_response.expires_in);

        Ok(CachedToken {
            access_token: token_response.access_token,
            expires_at,
        })
    }

    /// Ensure we have a valid token, requesting a new one if necessary.
    fn ensure_valid_token(&self) -> Result<String> {
        let mut cached = self.token.lock();

        if let Some(token) = cached.as_ref() {
            let now = Self::now_unix();
            if token.expires_at > now + TOKEN_EXPIRY_MARGIN_SECS {
                debug!(
                    "Spotify token is still valid for {} more seconds",
                    token.expires_at - now
                );
                return Ok(token.access_token.clone());
            }
            info!("Spotify token is expired or about to expire, requesting a new one");
        }

        let fresh = self.request_token()?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    fn get_json(&self, url: &str) -> Result<Value> {
        let access_token = self.ensure_valid_token()?;
        let auth_header = format!("Bearer {}", access_token);
        let headers = [
            ("Authorization", auth_header.as_str()),
            ("Content-Type", "application/json"),
        ];
        self.http
            .get_json_with_headers(url, &headers)
            .map_err(map_http_error)
    }

    /// Search for tracks matching a free-text query.
    ///
    /// Returns the ordered candidate list as the catalog ranks it; an empty
    /// list means no match, which callers turn into `NotFound` where that
    /// matters. See: https://developer.spotify.com/documentation/web-api/reference/search
    pub fn search_tracks(&self, query: &str, limit: u32) -> Result<Vec<Track>> {
        let url = format!(
            "{}/search?q={}&type=track&limit={}",
            SPOTIFY_API_BASE,
            urlencoding::encode(query),
            limit
        );

        debug!("Searching catalog for '{}' (limit {})", query, limit);
        let response = self.get_json(&url)?;
        let parsed: SearchResponse = serde_json::from_value(response)?;
        debug!("Search returned {} candidates", parsed.tracks.items.len());
        Ok(parsed.tracks.items)
    }

    /// Fetch audio-feature records for a batch of track ids.
    ///
    /// The result has one entry per requested id, in request order; ids the
    /// catalog cannot resolve come back as `None`. Each record is treated as
    /// an opaque field-to-value mapping.
    pub fn audio_features(&self, ids: &[String]) -> Result<Vec<Option<Map<String, Value>>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() > AUDIO_FEATURES_MAX_IDS {
            return Err(SpotifyError::ApiError(format!(
                "audio-features accepts at most {} ids per request, got {}",
                AUDIO_FEATURES_MAX_IDS,
                ids.len()
            )));
        }

        let ids_param = ids.join(",");
        let url = format!(
            "{}/audio-features?ids={}",
            SPOTIFY_API_BASE,
            urlencoding::encode(&ids_param)
        );

        debug!("Fetching audio features for {} ids", ids.len());
        let response = self.get_json(&url)?;
        let parsed: AudioFeaturesResponse = serde_json::from_value(response)?;
        Ok(parsed.audio_features)
    }
}

/// Tabular data structures shared by all operations
pub mod data;

/// Configuration utilities for credentials and service settings
pub mod config;

/// Logging configuration and utilities
pub mod logging;

/// Helper utilities for HTTP, throttling and the Spotify session
pub mod helpers;

/// The three catalog operations: single lookup, bulk lookup, feature enrichment
pub mod fetch;

pub use crate::config::Credentials;
pub use crate::data::table::Table;
pub use crate::fetch::{
    get_audio_features, search_bulk, search_song, BulkOptions, FeatureOptions, FetchError,
    MissingPolicy,
};
pub use crate::helpers::spotify::{Spotify, SpotifyError};
pub use crate::helpers::throttle::{SleepThrottle, Throttle};

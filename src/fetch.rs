// The three catalog operations: single lookup, bulk lookup and feature
// enrichment. All of them run against one injected Spotify session and pace
// themselves through an injected throttle.

use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::data::table::{Table, TableError};
use crate::helpers::spotify::{Spotify, SpotifyError, Track, AUDIO_FEATURES_MAX_IDS};
use crate::helpers::throttle::Throttle;

/// Default candidate count requested for a single lookup
pub const DEFAULT_SEARCH_LIMIT: u32 = 5;
/// Default candidate count requested per bulk-lookup row
pub const DEFAULT_BULK_LIMIT: u32 = 1;
/// Default ids per audio-features batch request
pub const DEFAULT_CHUNK_SIZE: usize = 50;

// Throttle cadence: 1 s after every 10th bulk row, 5 s after every chunk
const BULK_THROTTLE_EVERY: usize = 10;
const BULK_PAUSE: Duration = Duration::from_secs(1);
const CHUNK_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Catalog(#[from] SpotifyError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("Invalid option: {0}")]
    InvalidOption(String),
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// What to do with input rows whose lookup failed.
///
/// `Skip` reproduces the historical behavior: failed rows leave no trace in
/// the output (bulk lookup) or are dropped by the join (enrichment).
/// `KeepNull` preserves every input row and fills the gaps with nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingPolicy {
    #[default]
    Skip,
    KeepNull,
}

/// Options for `search_bulk`.
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Candidates requested per query; the first one is always taken
    pub limit: u32,
    pub missing: MissingPolicy,
}

impl Default for BulkOptions {
    fn default() -> Self {
        BulkOptions {
            limit: DEFAULT_BULK_LIMIT,
            missing: MissingPolicy::default(),
        }
    }
}

/// Options for `get_audio_features`.
#[derive(Debug, Clone)]
pub struct FeatureOptions {
    /// Ids per batch request, bounded by the upstream ceiling
    pub chunk_size: usize,
    pub missing: MissingPolicy,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        FeatureOptions {
            chunk_size: DEFAULT_CHUNK_SIZE,
            missing: MissingPolicy::default(),
        }
    }
}

/// Resolve one (title, artist) pair to a catalog identifier.
///
/// The query sent upstream is the plain concatenation `"<title> <artist>"`.
/// `limit` (default 5) only bounds how many candidates the catalog returns;
/// the first candidate is always taken. Unlike the bulk path this is
/// fail-fast: no match or any transport problem is returned to the caller.
pub fn search_song(
    session: &Spotify,
    title: &str,
    artist: &str,
    limit: Option<u32>,
) -> Result<String> {
    let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let query = format!("{} {}", title, artist);

    let tracks = session.search_tracks(&query, limit)?;
    match tracks.into_iter().next() {
        Some(track) => Ok(track.id),
        None => Err(SpotifyError::NotFound(format!("no candidates for '{}'", query)).into()),
    }
}

// First candidate of a query, with its display name and primary artist.
// A candidate without any artist entry counts as not found, matching the
// bulk path's treatment of incomplete records.
fn lookup_first(
    session: &Spotify,
    query: &str,
    limit: u32,
) -> std::result::Result<(String, String, String), SpotifyError> {
    let tracks = session.search_tracks(query, limit)?;
    let track: Track = tracks
        .into_iter()
        .next()
        .ok_or_else(|| SpotifyError::NotFound(format!("no candidates for '{}'", query)))?;
    let artist = track
        .primary_artist()
        .ok_or_else(|| SpotifyError::NotFound(format!("candidate for '{}' has no artist", query)))?
        .to_string();
    Ok((track.id, track.name, artist))
}

/// Resolve a column of free-text queries to identifier, name and artist
/// columns.
///
/// Each row's raw cell text is sent as the query (no title/artist
/// concatenation). Failed rows are logged and handled per the missing
/// policy; the operation itself never fails because of individual rows.
/// After every 10th processed row (successful or not) the throttle pauses
/// for one second.
///
/// The result has exactly three columns: `song_ids`, `song_names`,
/// `song_artists`. Under `MissingPolicy::Skip` its row count equals the
/// number of successful lookups and skipped rows leave no placeholder.
pub fn search_bulk(
    session: &Spotify,
    input: &Table,
    column: &str,
    options: &BulkOptions,
    throttle: &dyn Throttle,
) -> Result<Table> {
    let queries = input.text_column(column)?;
    let total = queries.len();

    let mut song_ids: Vec<Value> = Vec::new();
    let mut song_names: Vec<Value> = Vec::new();
    let mut song_artists: Vec<Value> = Vec::new();

    for (i, query) in queries.iter().enumerate() {
        match lookup_first(session, query, options.limit) {
            Ok((id, name, artist)) => {
                song_ids.push(Value::String(id));
                song_names.push(Value::String(name));
                song_artists.push(Value::String(artist));
            }
            Err(e) => {
                warn!("Skipping '{}': {}", query, e);
                if options.missing == MissingPolicy::KeepNull {
                    song_ids.push(Value::Null);
                    song_names.push(Value::Null);
                    song_artists.push(Value::Null);
                }
            }
        }

        info!("processed {}/{}", i + 1, total);

        if (i + 1) % BULK_THROTTLE_EVERY == 0 {
            throttle.pause(BULK_PAUSE);
        }
    }

    Ok(Table::from_columns(vec![
        ("song_ids", song_ids),
        ("song_names", song_names),
        ("song_artists", song_artists),
    ]))
}

/// Enrich a table of track identifiers with audio-feature columns.
///
/// The identifier column is partitioned into consecutive chunks of
/// `chunk_size` (default 50, last chunk may be shorter); each chunk is
/// fetched in one batch call. A failed chunk is logged and skipped whole.
/// The throttle pauses five seconds after every chunk, success or failure.
///
/// The result carries the input's columns plus the feature columns; the
/// feature-side identifier field is dropped as redundant. Under
/// `MissingPolicy::Skip` only rows with a retrieved feature record survive
/// (inner join); under `KeepNull` every input row survives with nulls in
/// the feature columns. Input row order is preserved.
pub fn get_audio_features(
    session: &Spotify,
    input: &Table,
    id_column: &str,
    options: &FeatureOptions,
    throttle: &dyn Throttle,
) -> Result<Table> {
    if options.chunk_size == 0 {
        return Err(FetchError::InvalidOption(
            "chunk_size must be a positive integer".to_string(),
        ));
    }
    if options.chunk_size > AUDIO_FEATURES_MAX_IDS {
        return Err(FetchError::InvalidOption(format!(
            "chunk_size must not exceed the upstream ceiling of {}",
            AUDIO_FEATURES_MAX_IDS
        )));
    }

    let ids = input.text_column(id_column)?;

    let mut records: HashMap<String, Map<String, Value>> = HashMap::new();
    let mut feature_columns: Vec<String> = Vec::new();

    for chunk in ids.chunks(options.chunk_size) {
        match session.audio_features(chunk) {
            Ok(batch) => {
                for record in batch.into_iter().flatten() {
                    let id = match record.get("id").and_then(|v| v.as_str()) {
                        Some(id) => id.to_string(),
                        None => {
                            warn!("Feature record without id field, dropping it");
                            continue;
                        }
                    };
                    if feature_columns.is_empty() {
                        feature_columns =
                            record.keys().filter(|k| *k != "id").cloned().collect();
                    }
                    records.insert(id, record);
                }
            }
            Err(e) => {
                error!("Error processing chunk of {} ids: {}", chunk.len(), e);
            }
        }

        debug!("pausing {} seconds between feature chunks", CHUNK_PAUSE.as_secs());
        throttle.pause(CHUNK_PAUSE);
    }

    let mut columns: Vec<String> = input.columns().to_vec();
    columns.extend(feature_columns.iter().cloned());
    let mut result = Table::new(columns);

    for (row, id) in input.rows().iter().zip(ids.iter()) {
        match records.get(id) {
            Some(record) => {
                let mut out = row.clone();
                for col in &feature_columns {
                    out.push(record.get(col).cloned().unwrap_or(Value::Null));
                }
                result.push_row(out)?;
            }
            None if options.missing == MissingPolicy::KeepNull => {
                let mut out = row.clone();
                out.extend(std::iter::repeat(Value::Null).take(feature_columns.len()));
                result.push_row(out)?;
            }
            None => {}
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::helpers::http_client::{HttpClient, HttpClientError};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    // ---- test doubles -----------------------------------------------------

    #[derive(Debug, Clone)]
    enum Reply {
        Json(Value),
        Fail,
    }

    /// HTTP mock that routes GET requests by URL substring and records
    /// every URL it sees. Token requests always succeed.
    #[derive(Debug, Clone)]
    struct MockHttp {
        routes: Arc<Vec<(String, Reply)>>,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl MockHttp {
        fn new(routes: Vec<(String, Reply)>) -> Self {
            MockHttp {
                routes: Arc::new(routes),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn feature_request_sizes(&self) -> Vec<usize> {
            self.requests
                .lock()
                .iter()
                .filter(|url| url.contains("audio-features"))
                .map(|url| url.matches("%2C").count() + 1)
                .collect()
        }
    }

    impl HttpClient for MockHttp {
        fn get_json_with_headers(
            &self,
            url: &str,
            _headers: &[(&str, &str)],
        ) -> std::result::Result<Value, HttpClientError> {
            self.requests.lock().push(url.to_string());
            for (needle, reply) in self.routes.iter() {
                if url.contains(needle.as_str()) {
                    return match reply {
                        Reply::Json(value) => Ok(value.clone()),
                        Reply::Fail => Err(HttpClientError::RequestError(
                            "simulated network failure".to_string(),
                        )),
                    };
                }
            }
            Err(HttpClientError::RequestError(format!(
                "no mock route for {}",
                url
            )))
        }

        fn post_form_with_headers(
            &self,
            _url: &str,
            _form: &[(&str, &str)],
            _headers: &[(&str, &str)],
        ) -> std::result::Result<Value, HttpClientError> {
            Ok(json!({
                "access_token": "test-token",
                "token_type": "Bearer",
                "expires_in": 3600
            }))
        }

        fn clone_box(&self) -> Box<dyn HttpClient> {
            Box::new(self.clone())
        }
    }

    /// Throttle that records pauses instead of sleeping.
    #[derive(Clone, Default)]
    struct CountingThrottle {
        pauses: Arc<Mutex<Vec<Duration>>>,
    }

    impl Throttle for CountingThrottle {
        fn pause(&self, wait: Duration) {
            self.pauses.lock().push(wait);
        }
    }

    // ---- fixtures ---------------------------------------------------------

    fn session(mock: &MockHttp) -> Spotify {
        Spotify::with_http_client(Credentials::new("id", "secret"), Box::new(mock.clone()))
    }

    fn search_reply(ids: &[&str]) -> Reply {
        let items: Vec<Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "name": format!("Track {}", id),
                    "artists": [{"id": null, "name": format!("Artist {}", id)}]
                })
            })
            .collect();
        Reply::Json(json!({"tracks": {"items": items}}))
    }

    fn query_route(query: &str) -> String {
        format!("q={}&type=track", urlencoding::encode(query))
    }

    fn feature_record(id: &str) -> Value {
        json!({
            "id": id,
            "danceability": 0.5,
            "energy": 0.7,
            "tempo": 120.0
        })
    }

    fn query_table(queries: &[&str]) -> Table {
        Table::from_columns(vec![(
            "query",
            queries.iter().map(|q| json!(q)).collect(),
        )])
    }

    fn id_table(ids: &[&str]) -> Table {
        Table::from_columns(vec![
            ("track_id", ids.iter().map(|id| json!(id)).collect()),
            (
                "source",
                ids.iter().map(|id| json!(format!("src-{}", id))).collect(),
            ),
        ])
    }

    // ---- single lookup ----------------------------------------------------

    #[test]
    fn test_search_song_returns_first_candidate() {
        let mock = MockHttp::new(vec![("search?q=".to_string(), search_reply(&["t1", "t2", "t3"]))]);
        let sp = session(&mock);

        assert_eq!(search_song(&sp, "Title", "Artist", None).unwrap(), "t1");
        // limit changes how much is asked for, never which candidate wins
        assert_eq!(search_song(&sp, "Title", "Artist", Some(10)).unwrap(), "t1");
    }

    #[test]
    fn test_search_song_concatenates_title_and_artist() {
        let mock = MockHttp::new(vec![(
            query_route("Blue Monday New Order"),
            search_reply(&["t9"]),
        )]);
        let sp = session(&mock);

        assert_eq!(
            search_song(&sp, "Blue Monday", "New Order", None).unwrap(),
            "t9"
        );
    }

    #[test]
    fn test_search_song_no_match_is_an_error() {
        let mock = MockHttp::new(vec![("search?q=".to_string(), search_reply(&[]))]);
        let sp = session(&mock);

        let err = search_song(&sp, "Title", "Artist", None).unwrap_err();
        assert!(matches!(
            err,
            FetchError::Catalog(SpotifyError::NotFound(_))
        ));
    }

    // ---- bulk lookup ------------------------------------------------------

    #[test]
    fn test_bulk_skips_failed_rows_without_placeholder() {
        let mock = MockHttp::new(vec![
            (query_route("Song One"), search_reply(&["s1"])),
            (query_route("Song Two"), Reply::Fail),
            (query_route("Song Three"), search_reply(&["s3"])),
        ]);
        let sp = session(&mock);
        let input = query_table(&["Song One", "Song Two", "Song Three"]);

        let result = search_bulk(
            &sp,
            &input,
            "query",
            &BulkOptions::default(),
            &CountingThrottle::default(),
        )
        .unwrap();

        assert_eq!(
            result.columns(),
            &[
                "song_ids".to_string(),
                "song_names".to_string(),
                "song_artists".to_string()
            ]
        );
        assert_eq!(result.len(), 2);
        assert_eq!(result.cell(0, "song_ids"), Some(&json!("s1")));
        assert_eq!(result.cell(1, "song_ids"), Some(&json!("s3")));
        assert_eq!(result.cell(1, "song_artists"), Some(&json!("Artist s3")));
    }

    #[test]
    fn test_bulk_no_match_counts_as_failure() {
        let mock = MockHttp::new(vec![
            (query_route("Hit"), search_reply(&["h1"])),
            (query_route("Miss"), search_reply(&[])),
        ]);
        let sp = session(&mock);
        let input = query_table(&["Hit", "Miss"]);

        let result = search_bulk(
            &sp,
            &input,
            "query",
            &BulkOptions::default(),
            &CountingThrottle::default(),
        )
        .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.cell(0, "song_ids"), Some(&json!("h1")));
    }

    #[test]
    fn test_bulk_keep_null_inserts_placeholders() {
        let mock = MockHttp::new(vec![
            (query_route("Song One"), search_reply(&["s1"])),
            (query_route("Song Two"), Reply::Fail),
            (query_route("Song Three"), search_reply(&["s3"])),
        ]);
        let sp = session(&mock);
        let input = query_table(&["Song One", "Song Two", "Song Three"]);

        let options = BulkOptions {
            missing: MissingPolicy::KeepNull,
            ..Default::default()
        };
        let result = search_bulk(&sp, &input, "query", &options, &CountingThrottle::default())
            .unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result.cell(1, "song_ids"), Some(&Value::Null));
        assert_eq!(result.cell(1, "song_names"), Some(&Value::Null));
        assert_eq!(result.cell(2, "song_ids"), Some(&json!("s3")));
    }

    #[test]
    fn test_bulk_throttles_after_every_tenth_row() {
        let mock = MockHttp::new(vec![("search?q=".to_string(), search_reply(&["x"]))]);
        let sp = session(&mock);
        let queries: Vec<String> = (0..25).map(|i| format!("song {}", i)).collect();
        let input = query_table(&queries.iter().map(String::as_str).collect::<Vec<_>>());

        let throttle = CountingThrottle::default();
        search_bulk(&sp, &input, "query", &BulkOptions::default(), &throttle).unwrap();

        // pauses after rows 10 and 20, none after row 25
        let pauses = throttle.pauses.lock();
        assert_eq!(pauses.len(), 2);
        assert!(pauses.iter().all(|p| *p == Duration::from_secs(1)));
    }

    #[test]
    fn test_bulk_unknown_column_is_a_typed_error() {
        let mock = MockHttp::new(vec![]);
        let sp = session(&mock);
        let input = query_table(&["a"]);

        let err = search_bulk(
            &sp,
            &input,
            "missing_column",
            &BulkOptions::default(),
            &CountingThrottle::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Table(TableError::UnknownColumn(_))));
    }

    #[test]
    fn test_bulk_is_idempotent_against_fixed_responses() {
        let mock = MockHttp::new(vec![
            (query_route("Song One"), search_reply(&["s1"])),
            (query_route("Song Two"), Reply::Fail),
        ]);
        let sp = session(&mock);
        let input = query_table(&["Song One", "Song Two"]);

        let first = search_bulk(
            &sp,
            &input,
            "query",
            &BulkOptions::default(),
            &CountingThrottle::default(),
        )
        .unwrap();
        let second = search_bulk(
            &sp,
            &input,
            "query",
            &BulkOptions::default(),
            &CountingThrottle::default(),
        )
        .unwrap();

        assert_eq!(first, second);
    }

    // ---- feature enrichment -----------------------------------------------

    #[test]
    fn test_features_chunked_at_chunk_size() {
        // every chunk fails, which still exercises the batching and pacing
        let mock = MockHttp::new(vec![("audio-features".to_string(), Reply::Fail)]);
        let sp = session(&mock);

        let ids: Vec<String> = (0..120).map(|i| format!("id{:03}", i)).collect();
        let input = id_table(&ids.iter().map(String::as_str).collect::<Vec<_>>());

        let throttle = CountingThrottle::default();
        let result = get_audio_features(
            &sp,
            &input,
            "track_id",
            &FeatureOptions::default(),
            &throttle,
        )
        .unwrap();

        assert_eq!(mock.feature_request_sizes(), vec![50, 50, 20]);
        // unconditional pause after every chunk, failed ones included
        let pauses = throttle.pauses.lock();
        assert_eq!(pauses.len(), 3);
        assert!(pauses.iter().all(|p| *p == Duration::from_secs(5)));
        // all chunks failed: nothing joined, input columns intact
        assert_eq!(result.len(), 0);
        assert_eq!(result.columns(), input.columns());
    }

    #[test]
    fn test_features_inner_join_drops_unresolved_rows() {
        let mock = MockHttp::new(vec![(
            "audio-features".to_string(),
            Reply::Json(json!({
                "audio_features": [feature_record("A"), null, feature_record("C")]
            })),
        )]);
        let sp = session(&mock);
        let input = id_table(&["A", "B", "C"]);

        let result = get_audio_features(
            &sp,
            &input,
            "track_id",
            &FeatureOptions::default(),
            &CountingThrottle::default(),
        )
        .unwrap();

        // feature keys come back sorted; the id field is dropped post-join
        assert_eq!(
            result.columns(),
            &[
                "track_id".to_string(),
                "source".to_string(),
                "danceability".to_string(),
                "energy".to_string(),
                "tempo".to_string()
            ]
        );
        assert_eq!(result.len(), 2);
        assert_eq!(result.cell(0, "track_id"), Some(&json!("A")));
        assert_eq!(result.cell(0, "source"), Some(&json!("src-A")));
        assert_eq!(result.cell(0, "tempo"), Some(&json!(120.0)));
        assert_eq!(result.cell(1, "track_id"), Some(&json!("C")));
    }

    #[test]
    fn test_features_keep_null_preserves_all_rows() {
        let mock = MockHttp::new(vec![(
            "audio-features".to_string(),
            Reply::Json(json!({
                "audio_features": [feature_record("A"), null, feature_record("C")]
            })),
        )]);
        let sp = session(&mock);
        let input = id_table(&["A", "B", "C"]);

        let options = FeatureOptions {
            missing: MissingPolicy::KeepNull,
            ..Default::default()
        };
        let result = get_audio_features(
            &sp,
            &input,
            "track_id",
            &options,
            &CountingThrottle::default(),
        )
        .unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result.cell(1, "track_id"), Some(&json!("B")));
        assert_eq!(result.cell(1, "energy"), Some(&Value::Null));
        assert_eq!(result.cell(2, "energy"), Some(&json!(0.7)));
    }

    #[test]
    fn test_features_rejects_invalid_chunk_size() {
        let mock = MockHttp::new(vec![]);
        let sp = session(&mock);
        let input = id_table(&["A"]);
        let throttle = CountingThrottle::default();

        for chunk_size in [0usize, AUDIO_FEATURES_MAX_IDS + 1] {
            let options = FeatureOptions {
                chunk_size,
                ..Default::default()
            };
            let err = get_audio_features(&sp, &input, "track_id", &options, &throttle)
                .unwrap_err();
            assert!(matches!(err, FetchError::InvalidOption(_)));
        }
    }

    #[test]
    fn test_features_idempotent_against_fixed_responses() {
        let mock = MockHttp::new(vec![(
            "audio-features".to_string(),
            Reply::Json(json!({
                "audio_features": [feature_record("A"), feature_record("B")]
            })),
        )]);
        let sp = session(&mock);
        let input = id_table(&["A", "B"]);

        let first = get_audio_features(
            &sp,
            &input,
            "track_id",
            &FeatureOptions::default(),
            &CountingThrottle::default(),
        )
        .unwrap();
        let second = get_audio_features(
            &sp,
            &input,
            "track_id",
            &FeatureOptions::default(),
            &CountingThrottle::default(),
        )
        .unwrap();

        assert_eq!(first, second);
    }
}

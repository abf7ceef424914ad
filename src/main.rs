use clap::{Arg, ArgAction, Command};
use log::error;
use serde_json::json;
use std::path::Path;

use songfetch::config::{load_config_file, Credentials};
use songfetch::data::table::Table;
use songfetch::fetch::{
    get_audio_features, search_bulk, search_song, BulkOptions, FeatureOptions, MissingPolicy,
};
use songfetch::helpers::throttle::SleepThrottle;
use songfetch::{logging, Spotify};

fn main() {
    let matches = Command::new("songfetch")
        .about("Spotify catalog lookup and audio-feature retrieval")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .required(false)
                .default_value("/etc/songfetch/songfetch.json"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose output")
                .required(false)
                .action(ArgAction::SetTrue),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("search")
                .about("Resolve one (title, artist) pair to a catalog id")
                .arg(
                    Arg::new("title")
                        .short('t')
                        .long("title")
                        .value_name("TITLE")
                        .required(true),
                )
                .arg(
                    Arg::new("artist")
                        .short('a')
                        .long("artist")
                        .value_name("ARTIST")
                        .required(true),
                )
                .arg(
                    Arg::new("limit")
                        .short('l')
                        .long("limit")
                        .value_name("N")
                        .help("How many candidates to ask the catalog for")
                        .value_parser(clap::value_parser!(u32).range(1..)),
                ),
        )
        .subcommand(
            Command::new("bulk")
                .about("Resolve a file of free-text queries, one per line")
                .arg(
                    Arg::new("input")
                        .short('i')
                        .long("input")
                        .value_name("FILE")
                        .required(true),
                )
                .arg(
                    Arg::new("limit")
                        .short('l')
                        .long("limit")
                        .value_name("N")
                        .value_parser(clap::value_parser!(u32).range(1..)),
                )
                .arg(
                    Arg::new("keep-missing")
                        .long("keep-missing")
                        .help("Keep unresolved rows as null placeholders instead of dropping them")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("features")
                .about("Fetch audio features for a file of track ids, one per line")
                .arg(
                    Arg::new("input")
                        .short('i')
                        .long("input")
                        .value_name("FILE")
                        .required(true),
                )
                .arg(
                    Arg::new("chunk-size")
                        .long("chunk-size")
                        .value_name("N")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("keep-missing")
                        .long("keep-missing")
                        .help("Keep rows without features as null placeholders")
                        .action(ArgAction::SetTrue),
                ),
        )
        .get_matches();

    logging::init(matches.get_flag("verbose"));

    // The config file is optional; credentials can come from the environment
    let config_path = matches.get_one::<String>("config").unwrap();
    let config = if Path::new(config_path).exists() {
        match load_config_file(Path::new(config_path)) {
            Ok(config) => Some(config),
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let credentials = match Credentials::resolve(config.as_ref()) {
        Ok(creds) => creds,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let session = Spotify::new(credentials);
    let throttle = SleepThrottle;

    match matches.subcommand() {
        Some(("search", sub)) => {
            let title = sub.get_one::<String>("title").unwrap();
            let artist = sub.get_one::<String>("artist").unwrap();
            let limit = sub.get_one::<u32>("limit").copied();

            match search_song(&session, title, artist, limit) {
                Ok(id) => println!("{}", id),
                Err(e) => {
                    error!("Search failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Some(("bulk", sub)) => {
            let input = load_column_file(sub.get_one::<String>("input").unwrap(), "query");
            let mut options = BulkOptions::default();
            if let Some(limit) = sub.get_one::<u32>("limit") {
                options.limit = *limit;
            }
            if sub.get_flag("keep-missing") {
                options.missing = MissingPolicy::KeepNull;
            }

            match search_bulk(&session, &input, "query", &options, &throttle) {
                Ok(result) => print_table(&result),
                Err(e) => {
                    error!("Bulk lookup failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Some(("features", sub)) => {
            let input = load_column_file(sub.get_one::<String>("input").unwrap(), "track_id");
            let mut options = FeatureOptions::default();
            if let Some(chunk_size) = sub.get_one::<usize>("chunk-size") {
                options.chunk_size = *chunk_size;
            }
            if sub.get_flag("keep-missing") {
                options.missing = MissingPolicy::KeepNull;
            }

            match get_audio_features(&session, &input, "track_id", &options, &throttle) {
                Ok(result) => print_table(&result),
                Err(e) => {
                    error!("Feature enrichment failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        _ => unreachable!("subcommand is required"),
    }
}

/// Read a single-column table from a text file, one entry per line.
/// Blank lines are ignored.
fn load_column_file(path: &str, column: &str) -> Table {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!("Failed to read input file {}: {}", path, e);
            std::process::exit(1);
        }
    };

    let values = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| json!(line))
        .collect();

    Table::from_columns(vec![(column, values)])
}

/// Print a table as tab-separated values with a header row.
fn print_table(table: &Table) {
    println!("{}", table.columns().join("\t"));
    for row in table.rows() {
        let cells: Vec<String> = row
            .iter()
            .map(|value| match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }
}

use env_logger::Builder;
use log::LevelFilter;
use once_cell::sync::OnceCell;
use std::io::Write;

static LOGGING_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Initialize logging for the application.
///
/// Uses info level for this crate (debug when verbose), warn for everything
/// else; `RUST_LOG` can still override any of it. Safe to call more than
/// once, later calls are no-ops.
pub fn init(verbose: bool) {
    LOGGING_INITIALIZED.get_or_init(|| {
        let level = if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };

        let mut builder = Builder::new();
        builder
            .filter_level(LevelFilter::Warn)
            .filter_module("songfetch", level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{}] {}: {}",
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .parse_default_env();

        let _ = builder.try_init();
    });
}

//! Optional logging setup for binaries and tests embedding this crate.
//!
//! The store itself only emits `log::error!` calls at I/O-open failures
//! and post-restore corruption checks (see `store::file`, `store::cached`,
//! `store::kv`); it never installs a subscriber. These helpers mirror the
//! teacher's `log4rs`-based convention for callers that want a concrete
//! rolling file log next to the store they opened.

/// Initializes logging from `log4rs.yaml` in the working directory.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    log4rs::init_file("log4rs.yaml", Default::default())?;
    Ok(())
}

/// Initializes logging to a store-scoped folder: `{store_name}_logs/store.log`.
/// Creates the folder if missing and writes rolling log files.
pub fn init_for_store(store_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    use log::LevelFilter;
    use log4rs::append::file::FileAppender;
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;
    use std::fs;

    let log_dir = format!("{store_name}_logs");
    fs::create_dir_all(&log_dir)?;
    let logfile = format!("{log_dir}/store.log");
    let encoder = Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}"));
    let file_appender = FileAppender::builder().encoder(encoder).build(logfile)?;
    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .build(Root::builder().appender("file").build(LevelFilter::Info))?;
    log4rs::init_config(config)?;
    Ok(())
}

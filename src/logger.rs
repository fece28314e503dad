use log::LevelFilter;

/// Maps repeated `-v` flags to a log level.
pub fn level(verbosity: u8) -> LevelFilter {
    match verbosity {
    | 0 => LevelFilter::Warn,
    | 1 => LevelFilter::Info,
    | 2 => LevelFilter::Debug,
    | _ => LevelFilter::Trace,
    }
}

/// Installs a timestamped logger on stderr.
pub fn init(verbosity: u8) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message,
            ))
        })
        .level(level(verbosity))
        .chain(std::io::stderr())
        .apply()
}

//! Logging setup: `fern` dispatches to stderr with a timestamped line
//! format, or to structured JSON-per-line when configured for machine
//! consumption, matching the `log` + `fern` + `chrono` stack the daemon's
//! sibling system services (networkd, udevd) use for the same purpose.

use vfsd_core::config::LogFormat;

pub fn init(level: &str, format: LogFormat) {
    let level_filter = level.parse().unwrap_or(log::LevelFilter::Info);

    let dispatch = match format {
        LogFormat::Pretty => fern::Dispatch::new().format(|out, message, record| {
            out.finish(format_args!(
                "{} [{:<5}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        }),
        LogFormat::Json => fern::Dispatch::new().format(|out, message, record| {
            out.finish(format_args!(
                "{{\"ts\":\"{}\",\"level\":\"{}\",\"target\":\"{}\",\"message\":{:?}}}",
                chrono::Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                message.to_string()
            ))
        }),
    };

    let result = dispatch
        .level(level_filter)
        .chain(std::io::stderr())
        .apply();

    if let Err(err) = result {
        eprintln!("logging already initialized: {err}");
    }
}

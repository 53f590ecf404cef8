use std::io::Write;

/// Install the global logger. `RUST_LOG` takes precedence over `default_filter`.
pub fn init_log(default_filter: Option<&str>) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(log::LevelFilter::Info)
        .format(|buf, record| {
            let level_style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "{level_style}{:<5}{level_style:#} [{}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        });
    if let Some(filter) = default_filter {
        builder.parse_filters(filter);
    }
    if let Ok(filter) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filter);
    }
    if builder.try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}

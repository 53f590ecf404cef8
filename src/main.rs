use anyhow::Result;
use clap::Parser;
use hvkrender::config::AppConfig;
use hvkrender::logging::init_log;

fn main() -> Result<()> {
    let config = AppConfig::parse();
    init_log(config.log_level.as_deref());
    log::debug!("{:?}", config);
    run(config)
}

#[cfg(windows)]
fn run(config: AppConfig) -> Result<()> {
    hvkrender::shell::run(config)
}

#[cfg(not(windows))]
fn run(_config: AppConfig) -> Result<()> {
    anyhow::bail!("hvkrender needs Direct3D and only runs on Windows")
}

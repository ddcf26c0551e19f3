use std::path::PathBuf;

/// Config file used when no path is given
const DEFAULT_CONFIG: &str = "camwatch.toml";

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    camwatch_lib::run(&config_path)
}

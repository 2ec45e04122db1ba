use clap::Parser;
use std::path::PathBuf;

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH (default: ./config.yaml)
  DB_PATH     (default: data/kidpoints.db)
  PORT        (default: 5150 or config.listen_port)
"#;

#[derive(Debug, Parser)]
#[command(
    name = "kidpoints-server",
    version,
    about = "Family points & goals server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Path to the YAML config file (overrides CONFIG_PATH)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database file (overrides DB_PATH)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Listen port (overrides PORT and the config file)
    #[arg(long)]
    pub port: Option<u16>,
}

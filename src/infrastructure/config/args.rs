use super::app_config::LogLevel;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "coverfetch",
    version,
    about = "Fetch and cache remote cover images",
    long_about = None
)]
pub struct CliArgs {
    /// Image URLs to fetch.
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Session token used to sign requests.
    #[arg(long, env = "COVERFETCH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Collection account whose session is stored or restored.
    #[arg(long, value_name = "NAME")]
    pub account: Option<String>,

    /// Store the given token in the system keyring.
    #[arg(long, requires = "token")]
    pub remember_token: bool,

    /// Delete the stored token before fetching.
    #[arg(long, conflicts_with = "remember_token")]
    pub forget_token: bool,

    /// Skip the thumbnail store.
    #[arg(long)]
    pub no_local_store: bool,

    /// Downscale images larger than this many pixels per side.
    #[arg(long, value_name = "PIXELS")]
    pub max_dimension: Option<u32>,

    /// HTTP timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Concurrent downloads.
    #[arg(long, value_name = "N")]
    pub max_concurrent_fetches: Option<usize>,
}

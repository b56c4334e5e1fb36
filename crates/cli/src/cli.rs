use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::tracing::{LogLevel, TracingFormat};

#[derive(Parser, Debug)]
#[command(name = "smsetup")]
#[command(about = "Install and cache the DigiCert signing tools")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        long,
        short = 'l',
        global = true,
        value_enum,
        default_value = "info",
        help = "Log level"
    )]
    pub level: LogLevel,

    #[arg(long, global = true, value_enum, default_value = "compact", help = "Log format")]
    pub format: TracingFormat,

    #[arg(
        long = "input",
        short = 'i',
        global = true,
        value_name = "NAME=VALUE",
        value_parser = parse_input,
        help = "Set an action input, overriding INPUT_<NAME>"
    )]
    pub inputs: Vec<(String, String)>,

    #[arg(
        long,
        global = true,
        help = "Target platform as os-arch (defaults to the host)"
    )]
    pub platform: Option<String>,

    #[arg(
        long,
        global = true,
        env = "SMSETUP_REMOTE_CACHE_DIR",
        help = "Directory used as the shared remote cache"
    )]
    pub remote_cache_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Attempts per network call")]
    pub retry_attempts: Option<u32>,

    #[arg(long, global = true, help = "Delay before the first retry, in milliseconds")]
    pub retry_delay_ms: Option<u64>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    #[command(about = "Acquire every signing tool for the platform")]
    Setup,
    #[command(about = "Acquire a single tool")]
    Acquire {
        #[arg(help = "Tool name (smctl, smpkcs11, smtools, smpkcs11-shim)")]
        tool: String,
    },
    #[command(about = "Print the resolved configuration as JSON")]
    Config,
}

fn parse_input(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{s}'")),
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

//! Command-line surface (spec-full §2.5): `clap` derive API, mirroring
//! how the teacher's binaries read environment/CLI inputs before standing
//! up the Actix server.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "trace-server", version, about = "Distributed-agent tracing backbone server")]
pub struct Cli {
    /// Path to a TOML configuration file. Missing file falls back to defaults.
    #[arg(long, value_name = "PATH", default_value = "trace-server.toml")]
    pub config: PathBuf,

    /// Overrides `streaming.port` from the config file.
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Overrides the log level (`RUST_LOG` still takes precedence if set).
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Print the fully resolved configuration and exit without starting the server.
    #[arg(long)]
    pub print_config: bool,
}

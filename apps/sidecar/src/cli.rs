use sidecar_core::config::ConfigOverrides;

use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments. Anything given here wins over the config file and `SIDE_*` variables.
#[derive(Debug, Parser)]
#[command(
    name = "sidecar",
    version,
    about = "Signs service events and submits them in batches to a KMS"
)]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// TCP port the event listener binds to.
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Name of the service this sidecar registers for.
    #[arg(long, short)]
    pub service: Option<String>,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            port: self.port,
            service_name: self.service.clone(),
        }
    }
}

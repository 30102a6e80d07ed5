// SPDX-License-Identifier: AGPL-3.0-or-later

//! Command-line configuration for the collaborative editing server.
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Address to bind the HTTP and WebSocket listener to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Directory the landing page and static assets are served from.
    #[arg(long, default_value = "static")]
    pub static_dir: PathBuf,

    /// Enable debug-level logging.
    #[arg(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_bind_address() {
        let cli = Cli::parse_from(["cowrite-server"]);
        assert_eq!(cli.bind.to_string(), "0.0.0.0:8080");
        assert!(!cli.debug);
    }
}

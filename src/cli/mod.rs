//! Command-line interface.
//!
//! `pairlink` with no subcommand serves HTTP. `pairlink check-config` loads
//! the configuration, reports problems and exits.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "pairlink")]
#[command(about = "Pair a phone number to a messaging session and export its credentials")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Port to listen on
    #[arg(short, long, env = "PORT", global = true)]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "HOST", global = true)]
    pub host: Option<IpAddr>,

    /// Root directory for per-attempt credentials
    #[arg(long, env = "SESSION_DIR", global = true)]
    pub session_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve the pairing API (default if no subcommand given)
    Serve,

    /// Validate configuration and exit
    CheckConfig,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Apply flag overrides on top of `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(dir) = &self.session_dir {
            config.session_root = dir.clone();
        }
    }
}

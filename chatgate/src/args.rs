use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use clap::Parser;
use config::Config;

const DEFAULT_LISTEN_ADDRESS: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 8000);

/// A chat gateway streaming Azure OpenAI completions with remote function calling.
#[derive(Debug, Parser)]
#[command(name = "chatgate", version)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "CHATGATE_CONFIG", default_value = "./chatgate.toml")]
    pub config: PathBuf,

    /// The address to listen on. Overrides `server.listen_address` from the configuration.
    #[arg(short, long, env = "CHATGATE_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,

    /// Log filter, such as "info" or "chat=debug,server=info".
    #[arg(long, env = "CHATGATE_LOG", default_value = "info")]
    pub log: String,
}

impl Args {
    pub fn listen_address(&self, config: &Config) -> SocketAddr {
        self.listen_address
            .or(config.server.listen_address)
            .unwrap_or(DEFAULT_LISTEN_ADDRESS)
    }
}

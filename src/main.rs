use std::sync::Arc;

use clap::Parser;

use pairlink::cli::{Cli, Command};
use pairlink::config::Config;
use pairlink::connection::BridgeConnectionFactory;
use pairlink::credentials::FileCredentialStore;
use pairlink::logging::{self, LogFormat};
use pairlink::pairing::{CoordinatorSettings, PairingCoordinator, PairingServices};
use pairlink::server::{AppState, PairingServer, router};
use pairlink::storage::HttpUploader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let format = LogFormat::from_env_value(std::env::var("LOG_FORMAT").ok().as_deref());
    logging::init("pairlink=info,tower_http=info", format);

    let mut config = Config::from_env()?;
    cli.apply(&mut config);
    let upload_url = config.require_upload_url()?.to_string();

    if cli.command() == Command::CheckConfig {
        println!("Configuration OK");
        println!("  listen:       {}", config.bind_addr());
        println!("  session root: {}", config.session_root.display());
        println!("  bridge:       {}", config.bridge_url);
        println!("  upload:       {}", upload_url);
        return Ok(());
    }

    tokio::fs::create_dir_all(&config.session_root).await?;

    let services = PairingServices {
        credentials: Arc::new(FileCredentialStore::new()),
        connections: Arc::new(BridgeConnectionFactory::new(config.bridge_url.clone())),
        uploader: Arc::new(HttpUploader::new(upload_url)),
    };
    let coordinator = PairingCoordinator::new(services, CoordinatorSettings::from_config(&config));

    let app = router(AppState { coordinator }, &config.public_dir);
    let mut server = PairingServer::new(config.bind_addr(), app);
    let addr = server.start().await?;
    tracing::info!(%addr, session_root = %config.session_root.display(), "Pairlink ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    server.shutdown().await;
    Ok(())
}

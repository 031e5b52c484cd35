//! cardroom server: WebSocket room sync plus the profile query API.
//!
//! Configured through `CARDROOM_*` environment variables; logging through
//! `RUST_LOG`.

use std::error::Error;
use std::sync::Arc;

use cardroom_collab::http::{self, ApiState};
use cardroom_collab::{
    Authenticator, InMemoryUserDirectory, ServerConfig, StaticTokenAuthenticator, SyncServer,
    UserDirectory,
};
use log::{info, warn};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    env_logger::init();

    let config = ServerConfig::from_env()?;

    let tokens = std::env::var("CARDROOM_TOKENS").unwrap_or_default();
    let tokens = StaticTokenAuthenticator::from_token_list(&tokens)?;
    if tokens.is_empty() {
        warn!("CARDROOM_TOKENS is empty; every connection will be refused");
    }
    let authenticator: Arc<dyn Authenticator> = Arc::new(tokens);

    let directory = match std::env::var("CARDROOM_USERS_FILE") {
        Ok(path) => {
            let directory = InMemoryUserDirectory::from_json_file(&path)?;
            info!("Loaded {} user profiles from {path}", directory.len());
            directory
        }
        Err(_) => InMemoryUserDirectory::new(),
    };
    let directory: Arc<dyn UserDirectory> = Arc::new(directory);

    info!("Starting cardroom server...");
    let server = SyncServer::new(config.clone(), authenticator.clone());

    match &config.http_addr {
        Some(addr) => {
            let listener = TcpListener::bind(addr).await?;
            let state = ApiState {
                authenticator,
                directory,
            };
            tokio::select! {
                result = server.run() => result?,
                result = http::serve(listener, state) => result?,
            }
        }
        None => server.run().await?,
    }

    Ok(())
}

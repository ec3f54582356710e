//! mixcloud-updater - edit Mixcloud show descriptions from the terminal

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mixcloud_backend::auth::{
    AuthorizationFlow, AuthorizationResult, FileTokenStore, ProviderTokenEndpoint, TokenStorage,
    TokenStore,
};
use mixcloud_backend::config::{Config, ConfigManager};
use mixcloud_backend::error::ApiError;
use mixcloud_backend::mixcloud::{MixcloudClient, ReqwestClient};

/// mixcloud-updater - edit Mixcloud show descriptions
#[derive(Parser, Debug)]
#[command(name = "mixcloud-updater")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authorize with Mixcloud in the browser and store the token
    Auth,

    /// Print a show's current details
    Show {
        /// Show URL, e.g. https://www.mixcloud.com/<user>/<show>/
        url: String,
    },

    /// Replace a show's description with the contents of a file
    Update {
        /// Show URL, e.g. https://www.mixcloud.com/<user>/<show>/
        url: String,

        /// Text file holding the new description
        file: PathBuf,
    },

    /// Report whether a usable token is stored
    Status,

    /// Remove the stored token
    Logout,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            let _ = cancel_tx.send(true);
        }
    });

    if let Err(e) = run(cli.command, cancel_rx).await {
        report(&e);
        std::process::exit(1);
    }
}

async fn run(command: Commands, cancel: watch::Receiver<bool>) -> Result<()> {
    let config = ConfigManager::new()?.get().with_env_overrides();
    let storage: Arc<dyn TokenStorage> = Arc::new(FileTokenStore::new()?);
    let store = Arc::new(TokenStore::open(storage.clone()).await?);

    match command {
        Commands::Auth => authorize(&config, &store, cancel).await,
        Commands::Show { url } => {
            let client = client(&config, store, cancel);
            let show = client.fetch_show(&url).await?;
            println!("{}", show.name);
            println!("{}", show.url);
            println!();
            println!("{}", show.description);
            Ok(())
        }
        Commands::Update { url, file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let client = client(&config, store, cancel);
            client.update_description(&url, text.trim_end()).await?;
            println!("Description updated.");
            Ok(())
        }
        Commands::Status => {
            let client = client(&config, store, cancel);
            if client.is_healthy() {
                println!("Authorized.");
            } else if client.load_token().is_some() {
                println!("Token stored but expired; run `mixcloud-updater auth` if requests fail.");
            } else {
                println!("Not authorized; run `mixcloud-updater auth`.");
            }
            Ok(())
        }
        Commands::Logout => {
            storage.delete().await?;
            println!("Stored token removed.");
            Ok(())
        }
    }
}

async fn authorize(
    config: &Config,
    store: &Arc<TokenStore>,
    cancel: watch::Receiver<bool>,
) -> Result<()> {
    if !config.has_credentials() {
        anyhow::bail!(
            "No Mixcloud application credentials; set client_id and client_secret in {}",
            ConfigManager::config_dir()?.join("config.json").display()
        );
    }

    let settings = config.oauth_settings();
    let endpoint = Arc::new(ProviderTokenEndpoint::new(ReqwestClient::new(), &settings));
    let flow = AuthorizationFlow::new(settings, endpoint);

    match flow.authorize(config.auth_timeout(), cancel.clone()).await {
        AuthorizationResult::Success(token) => {
            let client = client(config, store.clone(), cancel);
            client.save_token(token).await?;
            println!("Authorized.");
            Ok(())
        }
        other => anyhow::bail!("{}", other),
    }
}

fn client(
    config: &Config,
    store: Arc<TokenStore>,
    cancel: watch::Receiver<bool>,
) -> MixcloudClient<ReqwestClient> {
    MixcloudClient::new(
        config.client_settings(),
        &config.oauth_settings(),
        store,
        cancel,
    )
}

/// Prints an error with any actionable hint
fn report(error: &anyhow::Error) {
    eprintln!("Error: {:#}", error);

    let hint = error
        .downcast_ref::<ApiError>()
        .and_then(ApiError::as_oauth)
        .or_else(|| error.downcast_ref())
        .and_then(|e| e.user_hint());
    if let Some(hint) = hint {
        eprintln!("{}", hint);
    }
}

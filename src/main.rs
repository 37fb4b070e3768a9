use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use ol_auth::{
    AuthClient, EnvPassphrase, FileSecretStore, KeyOptions, KeyringSecretStore, Outcome,
    SecretStore, SessionManager, SessionState,
};
use ol_config::{AppConfig, StorageBackend};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const PASSPHRASE_ENV: &str = "OVERLOOK_PASSPHRASE";

#[derive(Debug, Parser)]
#[command(name = "overlook", version, about = "Sign in to overlook me")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Identity provider domain
    #[arg(long, global = true, env = "OVERLOOK_DOMAIN")]
    domain: Option<String>,

    #[arg(long, global = true, env = "OVERLOOK_CLIENT_ID")]
    client_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in through the browser
    Login,
    /// Check the stored session, renewing it if needed
    Status,
    /// Print a bearer token for API requests
    Token,
    /// Forget every stored secret
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config.as_deref() {
        Some(path) => AppConfig::load_from(path).await,
        None => AppConfig::load().await,
    }
    .context("Failed to load configuration")?;
    if let Some(domain) = cli.domain {
        config.auth.domain = domain;
    }
    if let Some(client_id) = cli.client_id {
        config.auth.client_id = client_id;
    }

    init_tracing(&config.log.level);

    let auth_config = config
        .to_auth_config()
        .context("Invalid auth configuration")?;
    let client = AuthClient::new(auth_config).context("Failed to create HTTP client")?;
    let store = open_store(&config)?;
    let manager = SessionManager::new(client, store);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Command::Login => login(&manager, &cancel).await,
        Command::Status => status(&manager, &cancel).await,
        Command::Token => token(&manager, &cancel).await,
        Command::Logout => {
            manager.logout().await;
            if let Some(kind) = manager.state().last_error {
                warn!("Some secrets could not be removed: {:?}", kind);
            }
            println!("Signed out");
            Ok(())
        }
    }
}

fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn SecretStore>> {
    match config.storage.backend {
        StorageBackend::Keyring => Ok(Arc::new(KeyringSecretStore::new(
            config.auth.keyring_service.clone(),
        ))),
        StorageBackend::File => {
            let dir = match config.storage.dir.clone() {
                Some(dir) => dir,
                None => FileSecretStore::default_storage_dir()?,
            };
            let store = FileSecretStore::open(
                &dir,
                KeyOptions::keyring(config.auth.keyring_service.clone()),
                &EnvPassphrase::new(PASSPHRASE_ENV),
            )
            .with_context(|| format!("Failed to open secret store at {}", dir.display()))?;
            Ok(Arc::new(store))
        }
    }
}

async fn login(manager: &SessionManager, cancel: &CancellationToken) -> anyhow::Result<()> {
    let url = manager.begin_login().await?;
    println!("Open this URL in your browser to sign in:\n\n  {}\n", url);
    println!("Then paste the URL you were redirected to:");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let redirect = tokio::select! {
        _ = cancel.cancelled() => bail!("Login cancelled"),
        line = lines.next_line() => line.context("Failed to read from stdin")?,
    };
    let Some(redirect) = redirect.filter(|l| !l.trim().is_empty()) else {
        bail!("No redirect URL given");
    };

    match manager.handle_redirect(redirect.trim(), cancel).await? {
        Outcome::Done(profile) => {
            println!("Signed in as {}", profile.email);
            Ok(())
        }
        Outcome::Cancelled => bail!("Login cancelled"),
    }
}

async fn status(manager: &SessionManager, cancel: &CancellationToken) -> anyhow::Result<()> {
    if manager.check_authentication(cancel).await.is_cancelled() {
        bail!("Status check cancelled");
    }
    print_state(&manager.state());
    Ok(())
}

async fn token(manager: &SessionManager, cancel: &CancellationToken) -> anyhow::Result<()> {
    match manager.check_authentication(cancel).await {
        Outcome::Done(true) => {}
        Outcome::Done(false) => {
            print_state(&manager.state());
            bail!("Not signed in; run `overlook login`");
        }
        Outcome::Cancelled => bail!("Cancelled"),
    }

    let token = Zeroizing::new(manager.bearer_token()?);
    println!("{}", token.as_str());
    Ok(())
}

fn print_state(state: &SessionState) {
    match state.profile() {
        Some(profile) => {
            let name = profile.display_name.as_deref().unwrap_or(&profile.email);
            println!("Signed in as {} ({})", name, profile.subject_id);
        }
        None => println!("Not signed in"),
    }
    if let Some(kind) = state.last_error {
        println!("Last error: {:?}", kind);
    }
}

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use coverfetch::domain::entities::{SessionToken, TargetId};
use coverfetch::domain::ports::SessionStoragePort;
use coverfetch::infrastructure::{
    AppConfig, CliArgs, DiskThumbnailStore, HttpByteFetcher, ImageLoader, ImageReadyEvent,
    KeyringSessionStorage, SessionSigner, StorageManager,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let storage = StorageManager::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

async fn setup_session(signer: &SessionSigner, args: &CliArgs, account: &str) {
    let storage = KeyringSessionStorage::new();

    if args.forget_token {
        match storage.remove_session(account).await {
            Ok(()) => info!(account, "Removed stored session token"),
            Err(e) => warn!(error = %e, "Failed to remove stored session token"),
        }
    }

    if let Some(raw) = &args.token {
        let Some(token) = SessionToken::new(raw.as_str()) else {
            warn!("Ignoring malformed session token");
            return;
        };
        if args.remember_token {
            match storage.save_session(account, &token).await {
                Ok(()) => info!(account, token = %token, "Stored session token"),
                Err(e) => warn!(error = %e, "Failed to store session token"),
            }
        }
        signer.set_session(token);
        return;
    }

    if args.forget_token {
        return;
    }

    match signer.restore(&storage, account).await {
        Ok(true) => info!("Restored session from keyring"),
        Ok(false) => info!("No stored session, requests are unsigned"),
        Err(e) => warn!(error = %e, "Could not read session from keyring"),
    }
}

fn print_event(event: &ImageReadyEvent) {
    match (&event.image, event.source) {
        (Some(image), Some(source)) => println!(
            "{} {}x{} {source}",
            event.key,
            image.width(),
            image.height()
        ),
        _ => println!("{} unavailable", event.key),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = coverfetch::VERSION, "Starting coverfetch");

    let signer = Arc::new(SessionSigner::new(config.session.auth_scheme.clone()));
    setup_session(&signer, &args, &config.session.account).await;

    let store_dir = config
        .effective_store_dir()
        .ok_or_else(|| eyre!("failed to determine thumbnail store directory"))?;
    let store = Arc::new(DiskThumbnailStore::new(store_dir, config.cache.store_bytes).await?);
    let fetcher = Arc::new(HttpByteFetcher::new(
        signer,
        Duration::from_secs(config.cache.timeout_secs),
    )?);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let loader = ImageLoader::new(config.loader_config(), fetcher, store, event_tx)?;

    let use_local_store = config.cache.use_local_store;
    for url in &args.urls {
        loader.request_image(url.as_str(), TargetId::generate(), use_local_store);
    }

    let mut remaining = args.urls.len();
    while remaining > 0 {
        let Some(event) = event_rx.recv().await else {
            break;
        };
        print_event(&event);
        remaining -= 1;
    }

    loader.wait_idle().await;

    let stats = loader.stats().memory;
    println!(
        "memory: {} images, {} bytes, {} hits, {} misses ({:.1}% hit rate)",
        stats.size, stats.bytes, stats.hits, stats.misses, stats.hit_rate
    );

    Ok(())
}

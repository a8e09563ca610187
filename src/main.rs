//! mpdweb - web client gateway for the Music Player Daemon

use clap::Parser;
use mpdweb::api::{self, ApiConfig, Daemon, Handler};
use mpdweb::config::Config;
use mpdweb::images::local::LocalCoverProvider;
use mpdweb::images::ImageProvider;
use mpdweb::mpd::{Client, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Web client gateway for the Music Player Daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides the configuration file)
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// MPD server address (overrides the configuration file)
    #[arg(short, long, value_name = "ADDR")]
    mpd: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("mpdweb={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(mpd) = args.mpd {
        config.mpd_addr = mpd;
    }

    info!("connecting to mpd at {}", config.mpd_addr);
    let client = Arc::new(Client::connect(&config.mpd_addr).await?);
    let (watcher, events) = Watcher::connect(&config.mpd_addr).await?;

    let mut providers: Vec<Arc<dyn ImageProvider>> = Vec::new();
    if let Some(music_directory) = &config.music_directory {
        providers.push(Arc::new(LocalCoverProvider::new(
            music_directory.clone(),
            config.cover_url_prefix.as_str(),
        )));
    }

    let handler = Handler::new(
        Daemon::from_client(client),
        events,
        providers,
        ApiConfig {
            background_timeout: config.background_timeout(),
            audio_proxy: config.audio_proxy.clone(),
            ..ApiConfig::default()
        },
    )
    .await?;

    let app = api::router(handler.clone());
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("listening on {}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("shutting down");
    watcher.shutdown().await;
    handler.shutdown().await;
    Ok(())
}

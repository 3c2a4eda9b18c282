//! # Bufo Bot
//!
//! Watches the Bluesky firehose and quote-posts matching bufos.
//!
//! ## Startup
//!
//! 1. Load `.env` and the configuration
//! 2. Fetch the catalog and build the phrase index
//! 3. Log in (only when posting is enabled; a failed login is fatal)
//! 4. Consume the firehose until the process is stopped
//!
//! # Example Usage
//!
//! ```bash
//! # Watch and log matches without posting
//! cargo run
//!
//! # Post for real
//! POSTING_ENABLED=true BSKY_HANDLE=... BSKY_APP_PASSWORD=... cargo run
//!
//! # Run with debug logging
//! RUST_LOG=debug cargo run
//! ```

use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;

use bufo_bot::{
    load_matcher, spawn_cooldown_sweeper, Bot, BotConfig, CooldownStore, PostingPipeline,
    SocialClient, StreamConsumer,
};

/// Initializes logging to stdout, `info` unless `RUST_LOG` says otherwise.
fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stdout)
        .init();
}

async fn run() -> bufo_bot::Result<()> {
    let config = BotConfig::from_env()?;

    let matcher = Arc::new(load_matcher(&config).await?);
    info!("Loaded {} matchable bufos", matcher.count());

    let mut client = SocialClient::new(
        config.handle.clone(),
        config.app_password.clone(),
        config.http_timeout,
    )?;
    if config.posting_enabled {
        client.login().await?;
    } else {
        info!("Posting disabled, not logging in");
    }

    let pipeline = PostingPipeline::new(
        Arc::new(client),
        CooldownStore::new(config.cooldown_window()),
        config.posting_enabled,
    );
    let bot = Arc::new(Bot::new(matcher, pipeline));
    let _sweeper = spawn_cooldown_sweeper(bot.clone());

    let mut consumer = StreamConsumer::new(&config.jetstream_endpoint)
        .with_idle_timeout(config.stream_idle_timeout);
    consumer.run(bot.as_ref()).await;
    Ok(())
}

/// Main entry point for the bufo bot.
///
/// Runs until interrupted. Exits non-zero when startup fails: bad configuration,
/// an empty catalog, or a rejected login while posting is enabled.
#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_logging();

    info!("Starting bufo bot...");

    tokio::select! {
        result = run() => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Bufo bot stopped: {}", e);
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping");
            ExitCode::SUCCESS
        }
    }
}

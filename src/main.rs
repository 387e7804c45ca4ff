mod args;
mod assemble;
mod audio;
mod background;
mod bot;
mod caption;
mod compose;
mod error;
mod ffmpeg;
mod pipeline;
mod quotes;
mod session;
mod telegram;
mod tts;

use anyhow::Context;
use args::Args;
use assemble::{Assembler, EncodeSettings};
use bot::{Bot, Dirs, Dispatcher};
use clap::Parser;
use pipeline::{ImageSettings, Pipeline};
use quotes::QuoteSource;
use std::fs;
use std::sync::Arc;
use telegram::Telegram;
use tracing::{error, info, warn};
use tts::{ElevenLabs, VoiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(args.log.as_str()) // e.g. "debug" or "quotereel=debug"
        .init();

    info!("Starting quote video bot");

    for dir in [&args.images_dir, &args.effects_dir, &args.output_dir] {
        fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir.display()))?;
    }
    info!(
        "Working directories ready: {}, {}, {}",
        args.images_dir.display(),
        args.effects_dir.display(),
        args.output_dir.display()
    );

    ffmpeg::check_installed().await?;
    if !args.font.exists() {
        warn!("Caption font not found: {}", args.font.display());
    }

    let quotes = QuoteSource::load_or_fetch(&args.corpus, &args.corpus_dataset)
        .await
        .with_context(|| format!("loading quote corpus {}", args.corpus.display()))?;
    if quotes.is_empty() {
        anyhow::bail!("quote corpus {} is empty", args.corpus.display());
    }

    let telegram = Arc::new(Telegram::new(args.telegram_token.clone()));
    let username = telegram.get_me().await?;
    info!("Authenticated as @{}", username);

    let synthesizer = ElevenLabs::new(
        args.elevenlabs_api_key.clone(),
        VoiceConfig::new(args.voice_id.clone(), args.model_id.clone()),
    );
    let assembler = Assembler::new(EncodeSettings {
        fps: args.fps,
        font: args.font.clone(),
        transition_secs: args.transition,
        ..EncodeSettings::default()
    });
    info!(
        "Encoding with {} at {} fps, transition {:.2}s",
        assembler.settings().video_codec,
        assembler.settings().fps,
        assembler.settings().transition_secs
    );
    let pipeline = Pipeline::new(
        Arc::new(quotes),
        Arc::new(synthesizer),
        assembler,
        ImageSettings {
            base_size: args.base_size,
            blur_sigma: args.blur,
        },
        args.output_dir.clone(),
    );

    let bot = Arc::new(Bot::new(
        telegram.clone(),
        Arc::new(pipeline),
        Dirs {
            images: args.images_dir.clone(),
            effects: args.effects_dir.clone(),
        },
    ));
    let mut dispatcher = Dispatcher::new(bot);

    tokio::select! {
        _ = telegram.poll(|envelope| dispatcher.dispatch(envelope)) => {
            error!("Telegram polling stopped unexpectedly");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for shutdown signal")?;
            info!("Shutdown requested");
        }
    }

    info!("Process complete.");
    Ok(())
}

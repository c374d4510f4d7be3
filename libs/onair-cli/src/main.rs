// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! OnAir CLI
//!
//! Publish to a WHIP endpoint from the command line, or inspect what the SDP
//! transform does to an offer.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use onair::VideoCodec;

mod commands;

#[derive(Parser)]
#[command(name = "onair")]
#[command(author, version, about = "WHIP publishing CLI", long_about = None)]
struct Cli {
    /// Log filter (overrides the config file; RUST_LOG wins over both)
    #[arg(long, global = true, value_name = "FILTER")]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish synthetic media to a WHIP endpoint until Ctrl+C
    Publish(PublishArgs),

    /// Apply the SDP transform to an offer file and print the result
    Munge(MungeArgs),
}

#[derive(Args, Debug, Default)]
pub struct PublishArgs {
    /// Config file (default: ./onair.yaml if present)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// WHIP endpoint URL
    #[arg(long, env = "ONAIR_WHIP_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Bearer token for the WHIP endpoint
    #[arg(long, env = "ONAIR_WHIP_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Room the stream belongs to
    #[arg(long)]
    pub room: Option<String>,

    /// Stream id within the room
    #[arg(long)]
    pub stream_id: Option<String>,

    /// Video bitrate cap in kbps
    #[arg(long, value_name = "KBPS")]
    pub bitrate: Option<u32>,

    /// Video framerate cap
    #[arg(long)]
    pub fps: Option<u32>,

    /// Preferred video codec (h264, vp8, vp9, av1)
    #[arg(long)]
    pub codec: Option<VideoCodec>,

    /// Force stereo, full-band Opus
    #[arg(long)]
    pub studio_sound: bool,

    /// Publish the microphone only
    #[arg(long)]
    pub audio_only: bool,

    /// H.264 Annex-B file looped as the video track
    #[arg(long, value_name = "FILE", conflicts_with = "audio_only")]
    pub video_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct MungeArgs {
    /// SDP offer file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Preferred video codec
    #[arg(long, default_value = "h264")]
    pub codec: VideoCodec,

    /// Video bitrate cap in kbps
    #[arg(long, value_name = "KBPS", default_value = "2500")]
    pub bitrate: u32,

    /// Video framerate cap
    #[arg(long, default_value = "30")]
    pub fps: u32,

    /// Force stereo, full-band Opus
    #[arg(long)]
    pub studio_sound: bool,
}

fn main() -> Result<()> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Publish(args) => commands::publish::run(args, cli.log).await,
        Commands::Munge(args) => commands::munge::run(&args, cli.log),
    }
}

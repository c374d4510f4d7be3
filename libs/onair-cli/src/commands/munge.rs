// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use anyhow::{Context, Result};
use onair::{EncodingProfile, LoggingConfig, init_logging, munge_offer};

use crate::MungeArgs;

/// Print the transformed offer on stdout and warnings on stderr.
pub fn run(args: &MungeArgs, log: Option<String>) -> Result<()> {
    let mut logging = LoggingConfig::default();
    if let Some(filter) = log {
        logging.filter = filter;
    }
    init_logging(&logging);

    let profile = EncodingProfile {
        video_codec: args.codec,
        max_bitrate_kbps: args.bitrate,
        max_framerate: args.fps,
        studio_sound: args.studio_sound,
    };
    profile.validate()?;

    let offer = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let munged = munge_offer(&offer, &profile);

    print!("{}", munged.sdp);
    for warning in &munged.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

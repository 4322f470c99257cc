//! # Reel Video Player
//!
//! Plays the first video stream of a local MP4/MKV file in a window.
//! Right/left arrow seek, closing the window quits.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use reel_core::config::{PlayerConfig, SurfaceConfig, DEFAULT_SEEK_DIVISOR, DEFAULT_TITLE};
use reel_core::input::{NoInput, WinitEvents};
use reel_core::render::{GpuPresenter, NullPresenter};
use reel_core::sync::Pacing;
use reel_core::{Demuxer, MediaSource, Player, PlayerError};

/// Exit code for a missing or malformed command line
const USAGE_EXIT_CODE: i32 = -1;

const DEFAULT_LOG_FILTER: &str = "reel=info,wgpu=warn";

/// Minimal video player
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Video file (MP4 or MKV)
    file: PathBuf,

    /// Print the stream table as JSON and exit
    #[arg(long)]
    probe: bool,

    /// Decode and convert without opening a window
    #[arg(long)]
    headless: bool,

    /// Stop after presenting this many frames
    #[arg(long, value_name = "N")]
    frames: Option<u64>,

    /// Present frames as fast as they decode
    #[arg(long)]
    no_pacing: bool,

    /// Seek step is the duration divided by this
    #[arg(long, value_name = "N", default_value_t = DEFAULT_SEEK_DIVISOR,
          value_parser = clap::value_parser!(u32).range(1..))]
    seek_divisor: u32,

    /// Window title
    #[arg(long, default_value = DEFAULT_TITLE)]
    title: String,
}

impl Cli {
    fn player_config(&self) -> PlayerConfig {
        PlayerConfig {
            surface: SurfaceConfig {
                title: self.title.clone(),
                ..SurfaceConfig::default()
            },
            pacing: if self.no_pacing {
                Pacing::Unpaced
            } else {
                Pacing::Native
            },
            seek_divisor: self.seek_divisor,
            max_frames: self.frames,
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => USAGE_EXIT_CODE,
            };
            // clap's message already carries the usage line
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Reel v{}", reel_core::VERSION);

    if let Err(e) = run(&cli) {
        let code = e.downcast_ref::<PlayerError>().map(PlayerError::exit_code).unwrap_or(1);
        eprintln!("Error: {e:#}");
        std::process::exit(code);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let demuxer = Demuxer::open(&cli.file)
        .map_err(PlayerError::from)
        .with_context(|| format!("Cannot open {}", cli.file.display()))?;

    if cli.probe {
        let streams = demuxer.probe_streams().map_err(PlayerError::from)?;
        println!("{}", serde_json::to_string_pretty(streams)?);
        return Ok(());
    }

    let config = cli.player_config();

    let stats = if cli.headless {
        let mut player = Player::open(demuxer, config, |_, _, _| Ok((NullPresenter::new(), NoInput)))?;
        let stats = player.run()?;
        tracing::info!(presents = player.presenter().presents, "Headless run finished");
        stats
    } else {
        let mut player = Player::open(demuxer, config, |surface, width, height| {
            let events = WinitEvents::new()?;
            let window = events.create_window(surface, width, height)?;
            let presenter = GpuPresenter::create(window, width, height)?;
            Ok((presenter, events))
        })?;
        player.run()?
    };

    if cli.headless {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_player_config() {
        let cli = Cli::try_parse_from(["reel", "movie.mp4"]).unwrap();
        assert_eq!(cli.player_config(), PlayerConfig::default());
    }

    #[test]
    fn flags_build_config() {
        let cli = Cli::try_parse_from([
            "reel",
            "movie.mkv",
            "--headless",
            "--frames",
            "30",
            "--no-pacing",
            "--seek-divisor",
            "4",
            "--title",
            "Clip",
        ])
        .unwrap();

        assert!(cli.headless);
        let config = cli.player_config();
        assert_eq!(config.max_frames, Some(30));
        assert_eq!(config.pacing, Pacing::Unpaced);
        assert_eq!(config.seek_divisor, 4);
        assert_eq!(config.surface.title, "Clip");
    }

    #[test]
    fn missing_file_is_a_usage_error() {
        let err = Cli::try_parse_from(["reel"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn zero_seek_divisor_is_rejected() {
        assert!(Cli::try_parse_from(["reel", "a.mp4", "--seek-divisor", "0"]).is_err());
    }
}

/// Jukebox - plays a queue of tracks through an external decoder
mod config;
mod console;
mod error;

use anyhow::Context;
use clap::Parser;
use crate::config::JukeboxConfig;
use crate::console::Command;
use jukebox_playback::{PlaybackCoordinator, SystemLauncher};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "jukebox")]
#[command(about = "Queue-driven player for mplayer-compatible decoders", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./jukebox.toml when present)
    #[arg(short, long, env = "JUKEBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Pick the next track at random
    #[arg(long)]
    shuffle: bool,

    /// Replay the queue once it runs out
    #[arg(long)]
    repeat: bool,

    /// Start volume in percent
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    volume: Option<u8>,

    /// Tracks to queue (files or URLs)
    files: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jukebox=info,jukebox_playback=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = JukeboxConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if cli.shuffle {
        config.playback.shuffle = true;
    }
    if cli.repeat {
        config.playback.repeat_all = true;
    }
    if let Some(volume) = cli.volume {
        config.playback.volume = f32::from(volume) / 100.0;
    }
    config.validate()?;

    tracing::info!(
        decoder = %config.decoder.program.display(),
        shuffle = config.playback.shuffle,
        repeat_all = config.playback.repeat_all,
        "Starting jukebox"
    );

    let coordinator = PlaybackCoordinator::start(
        config.playback,
        config.decoder,
        Arc::new(SystemLauncher),
    )?;

    let items = cli
        .files
        .iter()
        .map(|file| console::queue_item(file))
        .collect::<error::Result<Vec<_>>>()?;
    let autoplay = !items.is_empty();
    coordinator.queue().push(items, false);

    let printer = {
        let events = coordinator.events().clone();
        thread::Builder::new()
            .name("event-printer".to_string())
            .spawn(move || {
                for event in events {
                    if let Some(line) = console::describe(&event) {
                        println!("{}", line);
                    }
                }
            })?
    };

    if autoplay {
        coordinator.play(None)?;
    }

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match Command::parse(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(e) = execute(&coordinator, command) {
                    eprintln!("{}", e);
                }
            }
            Ok(None) => {}
            Err(e) => eprintln!("{} (try 'help')", e),
        }
    }

    coordinator.shutdown();
    drop(coordinator);
    if printer.join().is_err() {
        tracing::warn!("Event printer panicked");
    }

    Ok(())
}

fn execute(coordinator: &PlaybackCoordinator, command: Command) -> error::Result<()> {
    let queue = coordinator.queue();
    match command {
        Command::Play => coordinator.play(None)?,
        Command::Now(arg) => coordinator.play(Some(vec![console::queue_item(&arg)?]))?,
        Command::Stop => coordinator.stop()?,
        Command::Pause => coordinator.pause()?,
        Command::Resume => coordinator.resume()?,
        Command::Skip => coordinator.skip()?,
        Command::Seek(fraction) => coordinator.seek(fraction)?,
        Command::Volume(level) => coordinator.set_volume(level)?,
        Command::Add(arg) => queue.push(vec![console::queue_item(&arg)?], false),
        Command::Remove(index) => {
            let pending = queue.pending();
            let item = pending.get(index).ok_or_else(|| {
                error::AppError::Command(format!("no item at position {}", index + 1))
            })?;
            queue.remove(&[item.id]);
        }
        Command::Move { from, to } => queue.reorder(from, to)?,
        Command::Clear => queue.clear(),
        Command::Queue => {
            if let Some(current) = queue.current() {
                println!("now: {}", current.track.location.as_argument());
            }
            println!("{}", console::listing(&queue.pending()));
        }
        Command::History => println!("{}", console::listing(&queue.history())),
        Command::ClearHistory => queue.clear_history(),
        Command::Shuffle(enabled) => queue.set_shuffle(enabled),
        Command::Repeat(enabled) => queue.set_repeat_all(enabled),
        Command::Help => println!("{}", console::HELP),
        // Handled by the input loop
        Command::Quit => {}
    }
    Ok(())
}

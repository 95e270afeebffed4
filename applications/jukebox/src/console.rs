/// Line commands read from stdin and notification formatting
use crate::error::{AppError, Result};
use jukebox_playback::{PlaybackEvent, QueueItem, TrackRef};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    /// Play a track right away
    Now(String),
    Stop,
    Pause,
    Resume,
    Skip,
    /// Percent of the track
    Seek(f32),
    /// Percent volume
    Volume(f32),
    Add(String),
    Remove(usize),
    Move { from: usize, to: usize },
    Clear,
    Queue,
    History,
    ClearHistory,
    Shuffle(bool),
    Repeat(bool),
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let rest = line.trim_start()[verb.len()..].trim();

        let command = match verb.to_ascii_lowercase().as_str() {
            "play" | "p" if rest.is_empty() => Command::Play,
            "play" | "p" | "now" => Command::Now(rest.to_string()),
            "stop" => Command::Stop,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "skip" | "next" | "n" => Command::Skip,
            "seek" => Command::Seek(percent(rest)?),
            "volume" | "vol" => Command::Volume(percent(rest)?),
            "add" | "a" if !rest.is_empty() => Command::Add(rest.to_string()),
            "remove" | "rm" => Command::Remove(index(rest)?),
            "move" | "mv" => {
                let (from, to) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| AppError::Command("move <from> <to>".to_string()))?;
                Command::Move {
                    from: index(from)?,
                    to: index(to.trim())?,
                }
            }
            "clear" => Command::Clear,
            "queue" | "q" => Command::Queue,
            "history" | "h" if rest == "clear" => Command::ClearHistory,
            "history" | "h" => Command::History,
            "shuffle" => Command::Shuffle(switch(rest)?),
            "repeat" => Command::Repeat(switch(rest)?),
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => return Err(AppError::Command(line.trim().to_string())),
        };
        Ok(Some(command))
    }
}

fn percent(raw: &str) -> Result<f32> {
    let value: f32 = raw
        .trim_end_matches('%')
        .parse()
        .map_err(|_| AppError::Command(format!("expected a percentage, got '{}'", raw)))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(AppError::Command(format!("{} is not within 0-100", value)));
    }
    Ok(value / 100.0)
}

/// One-based index as shown by `queue`
fn index(raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n - 1),
        _ => Err(AppError::Command(format!("expected a position, got '{}'", raw))),
    }
}

fn switch(raw: &str) -> Result<bool> {
    match raw {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        _ => Err(AppError::Command(format!("expected on/off, got '{}'", raw))),
    }
}

pub const HELP: &str = "\
commands:
  play                 start playing the queue
  play <file|url>      play a track now
  stop | pause | resume | skip
  seek <percent>       jump within the current track
  volume <percent>
  add <file|url>       append to the queue
  remove <n> | move <from> <to> | clear
  queue | history | history clear
  shuffle on|off | repeat on|off
  quit";

/// Track reference for a command-line path or URL
pub fn track_from_arg(arg: &str) -> Result<Arc<TrackRef>> {
    let track = if arg.contains("://") {
        TrackRef::from_url(arg, arg)
    } else {
        let path = Path::new(arg);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let id = path.to_string_lossy().into_owned();
        // Length comes from the decoder's answer to the length query
        TrackRef::from_path(id, path, Duration::ZERO)
    };
    Ok(Arc::new(track))
}

pub fn queue_item(arg: &str) -> Result<QueueItem> {
    Ok(QueueItem::new(track_from_arg(arg)?))
}

/// Numbered listing, one item per line
pub fn listing(items: &[QueueItem]) -> String {
    if items.is_empty() {
        return "  (empty)".to_string();
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let marker = if item.planned { "*" } else { " " };
            format!("{:>3}{} {}", i + 1, marker, item.track.location.as_argument())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Console line for a notification; None for chatter
pub fn describe(event: &PlaybackEvent) -> Option<String> {
    match event {
        PlaybackEvent::StateChanged { state } => Some(format!("[{:?}]", state)),
        PlaybackEvent::TrackStarted { track_id, .. } => Some(format!("> playing {}", track_id)),
        PlaybackEvent::TrackEnded { track_id, .. } => Some(format!("- finished {}", track_id)),
        PlaybackEvent::PlaybackEnded => Some("queue finished".to_string()),
        PlaybackEvent::PlaybackError { code, message } => {
            Some(format!("! {} ({:?})", message, code))
        }
        PlaybackEvent::PositionUpdated { .. } | PlaybackEvent::QueueChanged { .. } => None,
    }
}

//! Line protocol spoken with the decoder
//!
//! Outbound: one newline-terminated command per line, verbs taken from
//! [`ProtocolSettings`]. Inbound: unstructured lines matched against an
//! ordered rule list, most specific first; unmatched lines are noise.

use regex::Regex;

use crate::error::Result;
use crate::settings::ProtocolSettings;

/// Commands understood by the decoder
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecoderCommand {
    QueryLength,
    QueryPosition,
    Pause,
    Resume,
    Quit,
    /// Absolute position as a fraction of the track, 0.0-1.0
    Seek(f32),
    /// Volume, 0.0-1.0
    Volume(f32),
}

impl DecoderCommand {
    /// Render the command line (without the trailing newline)
    pub fn render(&self, protocol: &ProtocolSettings) -> String {
        match self {
            DecoderCommand::QueryLength => protocol.query_length.clone(),
            DecoderCommand::QueryPosition => protocol.query_position.clone(),
            DecoderCommand::Pause => protocol.pause.clone(),
            DecoderCommand::Resume => protocol.resume.clone(),
            DecoderCommand::Quit => protocol.quit.clone(),
            DecoderCommand::Seek(fraction) => {
                let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u32;
                protocol.seek.replace("{value}", &percent.to_string())
            }
            DecoderCommand::Volume(level) => {
                let percent = (level.clamp(0.0, 1.0) * 100.0).round() as u32;
                protocol.volume.replace("{value}", &percent.to_string())
            }
        }
    }
}

/// Effect of a recognized response line
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineEvent {
    /// Decoder is exiting at end of stream
    EndOfStream,
    /// Decoder began producing audio
    Started,
    /// Current position in seconds
    Position(f64),
    /// Track length in seconds
    Length(f64),
}

#[derive(Debug, Clone, Copy)]
enum LineAction {
    EndOfStream,
    Started,
    Position,
    Length,
}

/// Ordered pattern -> action rules, evaluated once per line
#[derive(Debug, Clone)]
pub struct ResponseRules {
    rules: Vec<(Regex, LineAction)>,
}

impl ResponseRules {
    /// Compile the configured patterns; empty patterns are skipped
    pub fn compile(protocol: &ProtocolSettings) -> Result<Self> {
        let ordered = [
            (&protocol.end_pattern, LineAction::EndOfStream),
            (&protocol.start_pattern, LineAction::Started),
            (&protocol.position_pattern, LineAction::Position),
            (&protocol.length_pattern, LineAction::Length),
        ];

        let mut rules = Vec::with_capacity(ordered.len());
        for (pattern, action) in ordered {
            if pattern.trim().is_empty() {
                continue;
            }
            rules.push((Regex::new(pattern)?, action));
        }
        Ok(Self { rules })
    }

    /// First matching rule wins
    pub fn classify(&self, line: &str) -> Option<LineEvent> {
        for (regex, action) in &self.rules {
            let Some(captures) = regex.captures(line) else {
                continue;
            };
            return match action {
                LineAction::EndOfStream => Some(LineEvent::EndOfStream),
                LineAction::Started => Some(LineEvent::Started),
                LineAction::Position => parse_capture(&captures).map(LineEvent::Position),
                LineAction::Length => parse_capture(&captures).map(LineEvent::Length),
            };
        }
        None
    }
}

fn parse_capture(captures: &regex::Captures<'_>) -> Option<f64> {
    captures.get(1)?.as_str().trim().parse().ok()
}

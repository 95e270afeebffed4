//! Response reader
//!
//! One dedicated thread per decoder process. It blocks on the decoder's
//! output, classifies each line and publishes the resulting transitions to the
//! session's shared status and, in order, to the session event channel.

use crossbeam_channel::Sender;
use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

use crate::protocol::{LineEvent, ResponseRules};
use crate::session::{SessionEvent, SessionEventKind, SessionShared};
use crate::types::DecoderState;

pub(crate) struct ResponseReader {
    pub(crate) rules: ResponseRules,
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) events: Option<Sender<SessionEvent>>,
    pub(crate) generation: u64,
}

impl ResponseReader {
    /// Start reading `output` on a new thread
    pub(crate) fn spawn(self, output: Box<dyn Read + Send>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("decoder-reader-{}", self.generation))
            .spawn(move || self.run(output))
    }

    fn run(self, output: Box<dyn Read + Send>) {
        self.read_lines(output);
        self.shared.lock().reader_done = true;
        self.shared.changed.notify_all();
    }

    fn read_lines(&self, output: Box<dyn Read + Send>) {
        let mut reader = BufReader::new(output);
        let mut buf = Vec::with_capacity(256);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    self.on_closed();
                    return;
                }
                Ok(_) => {
                    // Decoders echo file names, which need not be UTF-8
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']);
                    trace!("decoder: {}", line);
                    if let Some(event) = self.rules.classify(line) {
                        self.apply(event);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.on_error(e);
                    return;
                }
            }
        }
    }

    fn apply(&self, event: LineEvent) {
        let mut status = self.shared.lock();
        let kind = match event {
            LineEvent::EndOfStream => {
                status.eof = true;
                status.opening = false;
                if status.state == DecoderState::Playing {
                    status.state = DecoderState::Eof;
                }
                Some(SessionEventKind::EndOfStream)
            }
            LineEvent::Started => {
                status.opening = false;
                Some(SessionEventKind::Started)
            }
            LineEvent::Position(seconds) => {
                status.position = Some(seconds);
                Some(SessionEventKind::Position(seconds))
            }
            LineEvent::Length(seconds) => {
                status.duration = Some(seconds);
                Some(SessionEventKind::Length(seconds))
            }
        };
        // A stopped session's generation is retired
        if let Some(kind) = kind.filter(|_| !status.stop_requested) {
            self.publish(kind);
        }
        drop(status);
        self.shared.changed.notify_all();
    }

    /// Decoder closed its output
    fn on_closed(&self) {
        let mut status = self.shared.lock();
        if status.stop_requested {
            debug!("Decoder output closed after stop");
        } else if !status.eof {
            debug!("Decoder closed its output without an end marker");
            status.eof = true;
            status.opening = false;
            if status.state == DecoderState::Playing {
                status.state = DecoderState::Eof;
            }
            self.publish(SessionEventKind::EndOfStream);
        }
        drop(status);
        self.shared.changed.notify_all();
    }

    fn on_error(&self, err: io::Error) {
        let mut status = self.shared.lock();
        if status.stop_requested {
            // Expected stream closed: the pipe was torn down by a deliberate stop
            debug!("Decoder stream closed during stop: {}", err);
        } else {
            error!("Error reading decoder output: {}", err);
            status.opening = false;
            status.state = DecoderState::Error;
            self.publish(SessionEventKind::Failed(err.to_string()));
            status.failure = Some(err);
        }
        drop(status);
        self.shared.changed.notify_all();
    }

    fn publish(&self, kind: SessionEventKind) {
        if let Some(events) = &self.events {
            // Receiver gone means nobody is listening any more
            let _ = events.send(SessionEvent {
                generation: self.generation,
                kind,
            });
        }
    }
}

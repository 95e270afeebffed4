//! Scripted decoder for tests
//!
//! [`ScriptedLauncher`] hands out in-memory processes that answer the default
//! mplayer slave protocol. Output is a channel-backed pipe, so the response
//! reader blocks on it exactly as it would on a real one.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::launch::{DecoderProcess, LaunchSpec, ProcessLauncher};

/// How a scripted decoder reacts once launched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderBehavior {
    /// Prints a banner and the start marker
    Plays,
    /// Prints the end marker and exits before starting
    ExitsBeforeStart,
    /// Prints nothing until stopped
    Hangs,
    /// Launch fails as if the executable were missing
    FailsToSpawn,
}

/// Data written by the decoder, or a failure surfaced to the reader
type Chunk = Result<Vec<u8>, String>;

struct ProcessControl {
    output: Option<Sender<Chunk>>,
    exited: bool,
    reaped: bool,
}

impl ProcessControl {
    fn emit(&self, line: &str) -> bool {
        match &self.output {
            Some(output) => output.send(Ok(format!("{}\n", line).into_bytes())).is_ok(),
            None => false,
        }
    }

    fn fail_output(&self, message: &str) -> bool {
        match &self.output {
            Some(output) => output.send(Err(message.to_string())).is_ok(),
            None => false,
        }
    }

    fn exit(&mut self) {
        self.output = None;
        self.exited = true;
    }
}

struct LauncherState {
    default: DecoderBehavior,
    overrides: Vec<(String, DecoderBehavior)>,
    launches: Vec<LaunchSpec>,
    commands: Vec<String>,
    processes: Vec<Arc<Mutex<ProcessControl>>>,
    length_secs: f64,
    position_secs: f64,
}

struct LauncherInner {
    state: Mutex<LauncherState>,
    changed: Condvar,
}

/// Launcher that creates scripted decoder processes
#[derive(Clone)]
pub struct ScriptedLauncher {
    inner: Arc<LauncherInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedLauncher {
    pub fn new(default: DecoderBehavior) -> Self {
        Self {
            inner: Arc::new(LauncherInner {
                state: Mutex::new(LauncherState {
                    default,
                    overrides: Vec::new(),
                    launches: Vec::new(),
                    commands: Vec::new(),
                    processes: Vec::new(),
                    length_secs: 30.0,
                    position_secs: 0.0,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Use `behavior` for launches whose arguments contain `fragment`
    pub fn behavior_for(self, fragment: impl Into<String>, behavior: DecoderBehavior) -> Self {
        lock(&self.inner.state)
            .overrides
            .push((fragment.into(), behavior));
        self
    }

    /// Value answered to length queries
    pub fn set_length(&self, seconds: f64) {
        lock(&self.inner.state).length_secs = seconds;
    }

    /// Value answered to position queries
    pub fn set_position(&self, seconds: f64) {
        lock(&self.inner.state).position_secs = seconds;
    }

    /// Make the most recent running decoder reach end of stream and exit
    pub fn finish_current(&self) -> bool {
        let process = self.running();
        match process {
            Some(process) => {
                let mut control = lock(&process);
                let sent = control.emit("Exiting... (End of file)");
                control.exit();
                sent
            }
            None => false,
        }
    }

    /// Make reads of the most recent running decoder's output fail
    ///
    /// The process itself keeps running until quit or killed.
    pub fn break_output(&self) -> bool {
        self.running()
            .is_some_and(|p| lock(&p).fail_output("Input/output error"))
    }

    /// Print `line` on the most recent running decoder's output
    pub fn emit_line(&self, line: &str) -> bool {
        self.running().is_some_and(|p| lock(&p).emit(line))
    }

    // Copied out first: processes lock their control before the launcher state
    fn processes(&self) -> Vec<Arc<Mutex<ProcessControl>>> {
        lock(&self.inner.state).processes.clone()
    }

    fn running(&self) -> Option<Arc<Mutex<ProcessControl>>> {
        self.processes()
            .into_iter()
            .rev()
            .find(|p| !lock(p).exited)
    }

    /// Every command line written to any decoder, in order
    pub fn commands(&self) -> Vec<String> {
        lock(&self.inner.state).commands.clone()
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        lock(&self.inner.state).launches.clone()
    }

    pub fn launch_count(&self) -> usize {
        lock(&self.inner.state).launches.len()
    }

    /// Processes launched but not yet reaped
    pub fn live_processes(&self) -> usize {
        self.processes()
            .iter()
            .filter(|p| !lock(p).reaped)
            .count()
    }

    /// Block until at least `count` launches happened
    pub fn wait_for_launches(&self, count: usize, timeout: Duration) -> bool {
        let state = lock(&self.inner.state);
        let (state, _) = self
            .inner
            .changed
            .wait_timeout_while(state, timeout, |s| s.launches.len() < count)
            .unwrap_or_else(PoisonError::into_inner);
        state.launches.len() >= count
    }
}

impl ProcessLauncher for ScriptedLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn DecoderProcess>> {
        let mut state = lock(&self.inner.state);
        state.launches.push(spec.clone());
        self.inner.changed.notify_all();

        let behavior = state
            .overrides
            .iter()
            .find(|(fragment, _)| spec.args.iter().any(|a| a.contains(fragment.as_str())))
            .map_or(state.default, |(_, b)| *b);

        if behavior == DecoderBehavior::FailsToSpawn {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", spec.program.display()),
            ));
        }

        let (tx, rx) = unbounded();
        let mut control = ProcessControl {
            output: Some(tx),
            exited: false,
            reaped: false,
        };
        match behavior {
            DecoderBehavior::Plays => {
                control.emit("MPlayer 1.5 (C) 2000-2022 MPlayer Team");
                control.emit("Starting playback...");
            }
            DecoderBehavior::ExitsBeforeStart => {
                control.emit("Exiting... (End of file)");
                control.exit();
            }
            DecoderBehavior::Hangs | DecoderBehavior::FailsToSpawn => {}
        }

        let control = Arc::new(Mutex::new(control));
        state.processes.push(control.clone());

        Ok(Box::new(ScriptedProcess {
            launcher: self.inner.clone(),
            control,
            stdout: Some(ChannelPipe {
                rx,
                buf: Vec::new(),
                pos: 0,
            }),
        }))
    }
}

struct ScriptedProcess {
    launcher: Arc<LauncherInner>,
    control: Arc<Mutex<ProcessControl>>,
    stdout: Option<ChannelPipe>,
}

impl DecoderProcess for ScriptedProcess {
    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.stdout
            .take()
            .map(|pipe| Box::new(pipe) as Box<dyn Read + Send>)
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut control = lock(&self.control);
        if control.exited {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Broken pipe"));
        }

        let (length, position) = {
            let mut state = lock(&self.launcher.state);
            state.commands.push(line.to_string());
            (state.length_secs, state.position_secs)
        };

        match line {
            "quit" => control.exit(),
            "get_time_length" => {
                control.emit(&format!("ANS_LENGTH={:.2}", length));
            }
            "get_time_pos" => {
                control.emit(&format!("ANS_TIME_POSITION={:.1}", position));
            }
            _ => {}
        }
        Ok(())
    }

    fn try_wait(&mut self) -> io::Result<bool> {
        Ok(lock(&self.control).exited)
    }

    fn kill(&mut self) -> io::Result<()> {
        lock(&self.control).exit();
        Ok(())
    }

    fn wait(&mut self) -> io::Result<()> {
        let mut control = lock(&self.control);
        control.exit();
        control.reaped = true;
        Ok(())
    }

    fn id(&self) -> Option<u32> {
        None
    }
}

/// Read half of an in-memory pipe; EOF once every writer is gone
struct ChannelPipe {
    rx: Receiver<Chunk>,
    buf: Vec<u8>,
    pos: usize,
}

impl Read for ChannelPipe {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.buf.len() {
            match self.rx.recv() {
                Ok(Ok(chunk)) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                Ok(Err(message)) => return Err(io::Error::new(io::ErrorKind::Other, message)),
                Err(_) => return Ok(0),
            }
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

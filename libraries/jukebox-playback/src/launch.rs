//! Decoder process launching
//!
//! Platform process creation sits behind [`ProcessLauncher`] so the session can
//! drive either a real executable or a scripted stand-in.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::settings::DecoderSettings;
use crate::types::TrackRef;

/// Fully resolved decoder command line and environment overlay
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Overlaid on top of the inherited environment
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Build the launch arguments for `track`
    ///
    /// Order: user extra args, normalization filter, then the template with
    /// `{file}` and `{start}` substituted.
    pub fn build(
        settings: &DecoderSettings,
        track: &TrackRef,
        start_secs: f64,
        env: BTreeMap<String, String>,
    ) -> Self {
        let file = track.location.as_argument();
        let start = format!("{:.1}", start_secs.max(0.0));

        let mut args: Vec<String> = settings
            .extra_args
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if settings.use_volume_normalization {
            args.push("-af".to_string());
            args.push("volnorm".to_string());
        }
        args.extend(
            settings
                .args
                .iter()
                .map(|arg| arg.replace("{file}", &file).replace("{start}", &start)),
        );

        Self {
            program: settings.program.clone(),
            args,
            env,
        }
    }

    /// Display form for logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// A running decoder process with its standard streams
pub trait DecoderProcess: Send {
    /// Output stream, handed once to the response reader
    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Write one newline-terminated command
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Non-blocking exit check
    fn try_wait(&mut self) -> io::Result<bool>;

    /// Force termination; closes the output pipe
    fn kill(&mut self) -> io::Result<()>;

    /// Reap the process
    fn wait(&mut self) -> io::Result<()>;

    fn id(&self) -> Option<u32>;
}

/// Creates decoder processes
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn DecoderProcess>>;
}

/// Launches real executables through `std::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn DecoderProcess>> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take();
        Ok(Box::new(SystemProcess { child, stdin }))
    }
}

struct SystemProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl DecoderProcess for SystemProcess {
    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stdout
            .take()
            .map(|out| Box::new(out) as Box<dyn Read + Send>)
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "decoder input closed"))?;
        stdin.write_all(line.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()
    }

    fn try_wait(&mut self) -> io::Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.stdin = None;
        match self.child.kill() {
            // Already exited
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    fn wait(&mut self) -> io::Result<()> {
        self.stdin = None;
        self.child.wait().map(|_| ())
    }

    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }
}

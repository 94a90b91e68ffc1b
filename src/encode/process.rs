//! External encoder process.
//!
//! State machine: `Uninitialized -> Launching -> Running -> (Draining | Crashed) -> Closed`.
//!
//! Frames go to the encoder's stdin as raw BGR24. A drain thread reads the
//! encoder's stderr for the whole session so the pipe never fills up, logs
//! warnings and errors, and keeps the last lines as the crash diagnostic.
//! A dead encoder is always fatal, whether noticed before a write or by a
//! broken pipe during it.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{conform, EncoderBackend};
use crate::config::PipelineConfig;
use crate::frame::Frame;
use crate::StreamError;

pub const DEFAULT_ENCODER_PROGRAM: &str = "ffmpeg";

const LAUNCH_GRACE: Duration = Duration::from_millis(500);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const EXIT_POLL: Duration = Duration::from_millis(20);
const DIAGNOSTIC_TAIL: usize = 32;
const DRAIN_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How an encoder process ended. `code` is `None` when killed by a signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// A running encoder process.
pub trait EncoderProcess: Send {
    fn id(&self) -> u32;

    /// Write one raw frame to the process input.
    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Close the process input so the encoder can flush and exit.
    fn close_input(&mut self) -> io::Result<()>;

    /// The diagnostic (stderr) stream. Returns `Some` at most once.
    fn take_diagnostics(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Non-blocking liveness poll; reaps the process once it has exited.
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;

    fn kill(&mut self) -> io::Result<()>;
}

/// Starts encoder processes.
pub trait ProcessLauncher: Send {
    fn launch(&mut self, program: &str, args: &[String]) -> io::Result<Box<dyn EncoderProcess>>;
}

/// Launcher backed by `std::process`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(&mut self, program: &str, args: &[String]) -> io::Result<Box<dyn EncoderProcess>> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        // Own process group: a terminal Ctrl-C reaches the streamer only, and
        // the encoder is stopped by the session's close.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command.spawn()?;
        let stdin = child.stdin.take();
        Ok(Box::new(SystemProcess { child, stdin }))
    }
}

struct SystemProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl EncoderProcess for SystemProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(bytes),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "encoder input already closed",
            )),
        }
    }

    fn close_input(&mut self) -> io::Result<()> {
        match self.stdin.take() {
            Some(mut stdin) => stdin.flush(),
            None => Ok(()),
        }
    }

    fn take_diagnostics(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as Box<dyn Read + Send>)
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ProcessExit {
                code: status.code(),
            }))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }
}

/// Encoder arguments: raw BGR24 on stdin, low-latency baseline H.264, RTP out.
pub fn encoder_args(config: &PipelineConfig) -> Vec<String> {
    let size = format!("{}x{}", config.width, config.height);
    let fps = config.fps.to_string();
    let bitrate = format!("{}k", config.bitrate_kbps);
    let bufsize = format!("{}k", u64::from(config.bitrate_kbps) * 2);
    let target = format!("rtp://{}:{}", config.host, config.port);
    [
        "-hide_banner", "-loglevel", "warning",
        "-f", "rawvideo", "-pix_fmt", "bgr24", "-s", size.as_str(), "-r", fps.as_str(), "-i", "-",
        "-c:v", "libx264", "-preset", "ultrafast", "-tune", "zerolatency",
        "-profile:v", "baseline", "-pix_fmt", "yuv420p",
        "-b:v", bitrate.as_str(), "-maxrate", bitrate.as_str(), "-bufsize", bufsize.as_str(),
        "-g", "15", "-refs", "1", "-bf", "0", "-threads", "2",
        "-f", "rtp", "-payload_type", "96", "-pkt_size", "1200", target.as_str(),
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

// ----------------------------------------------------------------------------
// Diagnostic drain
// ----------------------------------------------------------------------------

struct DiagnosticDrain {
    tail: Arc<Mutex<VecDeque<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl DiagnosticDrain {
    fn spawn(program: &str, stream: Box<dyn Read + Send>) -> io::Result<Self> {
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(DIAGNOSTIC_TAIL)));
        let sink = Arc::clone(&tail);
        let label = program.to_string();
        let handle = thread::Builder::new()
            .name("encoder-diagnostics".to_string())
            .spawn(move || drain_lines(&label, stream, &sink))?;
        Ok(Self {
            tail,
            handle: Some(handle),
        })
    }

    /// Wait up to `timeout` for the stream to hit EOF.
    ///
    /// A descendant of the encoder can keep the stream open after the encoder
    /// itself is gone; the thread is then left to finish on its own.
    fn join(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            if Instant::now() >= deadline {
                log::debug!("ProcessEncoder: diagnostic stream still open, not waiting for it");
                self.handle = None;
                return;
            }
            thread::sleep(EXIT_POLL);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("ProcessEncoder: diagnostic drain thread panicked");
            }
        }
    }

    fn snapshot(&self) -> String {
        let tail = match self.tail.lock() {
            Ok(tail) => tail,
            Err(poisoned) => poisoned.into_inner(),
        };
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

fn drain_lines(label: &str, stream: Box<dyn Read + Send>, tail: &Mutex<VecDeque<String>>) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                log::debug!("ProcessEncoder: {} diagnostic stream ended: {}", label, err);
                break;
            }
        };
        let line = line.trim_end().to_string();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_ascii_lowercase();
        if lower.contains("error") || lower.contains("warning") {
            log::warn!("ProcessEncoder: {}: {}", label, line);
        } else {
            log::trace!("ProcessEncoder: {}: {}", label, line);
        }
        let mut tail = match tail.lock() {
            Ok(tail) => tail,
            Err(poisoned) => poisoned.into_inner(),
        };
        if tail.len() == DIAGNOSTIC_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

// ----------------------------------------------------------------------------
// Backend
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProcessState {
    Uninitialized,
    Launching,
    Running,
    Draining,
    Crashed,
    Closed,
}

/// `EncoderBackend` feeding an external encoder process.
pub struct ProcessEncoderBackend {
    program: String,
    launcher: Box<dyn ProcessLauncher>,
    grace: Duration,
    close_timeout: Duration,
    state: ProcessState,
    process: Option<Box<dyn EncoderProcess>>,
    drain: Option<DiagnosticDrain>,
    size: (u32, u32),
    frames_written: u64,
}

impl ProcessEncoderBackend {
    pub fn new(program: impl Into<String>, launcher: Box<dyn ProcessLauncher>) -> Self {
        Self {
            program: program.into(),
            launcher,
            grace: LAUNCH_GRACE,
            close_timeout: CLOSE_TIMEOUT,
            state: ProcessState::Uninitialized,
            process: None,
            drain: None,
            size: (0, 0),
            frames_written: 0,
        }
    }

    /// `ffmpeg` from `PATH`.
    pub fn system() -> Self {
        Self::new(DEFAULT_ENCODER_PROGRAM, Box::new(SystemLauncher))
    }

    /// Override the post-launch grace interval and the close timeout.
    pub fn with_timing(mut self, grace: Duration, close_timeout: Duration) -> Self {
        self.grace = grace;
        self.close_timeout = close_timeout;
        self
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Collect whatever the encoder printed.
    ///
    /// The drain is joined only when the exit was observed; otherwise the
    /// stream may never reach EOF and the tail seen so far is used.
    fn collect_diagnostic(&mut self, exit: Option<ProcessExit>) -> String {
        let output = match self.drain.as_mut() {
            Some(drain) => {
                if exit.is_some() {
                    drain.join(DRAIN_JOIN_TIMEOUT);
                }
                drain.snapshot()
            }
            None => String::new(),
        };
        let status = exit
            .map(|e| e.to_string())
            .unwrap_or_else(|| "exit not observed".to_string());
        if output.is_empty() {
            format!("{} ({}, no diagnostic output)", self.program, status)
        } else {
            format!("{} ({}):\n{}", self.program, status, output)
        }
    }

    fn crashed(&mut self, exit: Option<ProcessExit>) -> StreamError {
        self.state = ProcessState::Crashed;
        let diagnostic = self.collect_diagnostic(exit);
        log::error!(
            "ProcessEncoder: encoder died after {} frames: {}",
            self.frames_written,
            diagnostic
        );
        StreamError::TransportCrashed { diagnostic }
    }

    /// Kill an encoder that stopped reading its input but did not exit.
    fn kill_and_reap(&mut self) -> Option<ProcessExit> {
        let process = self.process.as_mut()?;
        log::warn!(
            "ProcessEncoder: {} stopped accepting frames but is still running, killing",
            self.program
        );
        if let Err(err) = process.kill() {
            log::warn!("ProcessEncoder: kill {} failed: {}", self.program, err);
        }
        self.wait_for_exit(EXIT_POLL * 5)
    }

    /// Poll until exit or `timeout`; `None` when still running.
    fn wait_for_exit(&mut self, timeout: Duration) -> Option<ProcessExit> {
        let process = self.process.as_mut()?;
        let deadline = Instant::now() + timeout;
        loop {
            match process.try_wait() {
                Ok(Some(exit)) => return Some(exit),
                Ok(None) => {}
                Err(err) => {
                    log::warn!("ProcessEncoder: wait on {} failed: {}", self.program, err);
                    return None;
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(EXIT_POLL.min(timeout));
        }
    }
}

impl EncoderBackend for ProcessEncoderBackend {
    fn name(&self) -> &str {
        "encoder-process"
    }

    fn open(&mut self, config: &PipelineConfig) -> Result<(), StreamError> {
        if self.state == ProcessState::Running {
            return Ok(());
        }
        self.state = ProcessState::Launching;
        self.frames_written = 0;
        self.size = (config.width, config.height);

        let args = encoder_args(config);
        log::debug!("ProcessEncoder: {} {}", self.program, args.join(" "));
        let mut process = match self.launcher.launch(&self.program, &args) {
            Ok(process) => process,
            Err(err) => {
                self.state = ProcessState::Closed;
                let diagnostic = if err.kind() == io::ErrorKind::NotFound {
                    format!("encoder executable not found: {}", self.program)
                } else {
                    format!("spawn failed: {}", err)
                };
                return Err(StreamError::LaunchFailed {
                    program: self.program.clone(),
                    diagnostic,
                });
            }
        };

        self.drain = match process.take_diagnostics() {
            Some(stream) => match DiagnosticDrain::spawn(&self.program, stream) {
                Ok(drain) => Some(drain),
                Err(err) => {
                    let _ = process.kill();
                    let _ = process.try_wait();
                    self.state = ProcessState::Closed;
                    return Err(StreamError::LaunchFailed {
                        program: self.program.clone(),
                        diagnostic: format!("cannot start diagnostic drain: {}", err),
                    });
                }
            },
            None => None,
        };
        let pid = process.id();
        self.process = Some(process);

        thread::sleep(self.grace);
        let poll = match self.process.as_mut() {
            Some(process) => process.try_wait(),
            None => Ok(None),
        };
        match poll {
            Ok(None) => {}
            Ok(Some(exit)) => {
                let diagnostic = self.collect_diagnostic(Some(exit));
                self.process = None;
                self.drain = None;
                self.state = ProcessState::Closed;
                return Err(StreamError::LaunchFailed {
                    program: self.program.clone(),
                    diagnostic,
                });
            }
            Err(err) => {
                let _ = self.close();
                return Err(StreamError::LaunchFailed {
                    program: self.program.clone(),
                    diagnostic: format!("cannot poll encoder: {}", err),
                });
            }
        }

        self.state = ProcessState::Running;
        log::info!(
            "ProcessEncoder: {} (pid {}) streaming to rtp://{}",
            self.program,
            pid,
            config.target_addr()
        );
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), StreamError> {
        if self.state != ProcessState::Running {
            return Err(StreamError::NotOpen);
        }
        let frame = conform(frame, self.size.0, self.size.1)?;
        let Some(process) = self.process.as_mut() else {
            return Err(StreamError::NotOpen);
        };

        match process.try_wait() {
            Ok(Some(exit)) => return Err(self.crashed(Some(exit))),
            Ok(None) => {}
            Err(err) => {
                log::warn!("ProcessEncoder: liveness poll failed: {}", err);
            }
        }

        if let Err(err) = process.write_frame(frame.as_bytes()) {
            log::debug!("ProcessEncoder: write failed: {}", err);
            // Give the process a moment to finish dying so its exit and output are captured.
            let exit = match self.wait_for_exit(EXIT_POLL * 5) {
                Some(exit) => Some(exit),
                None => self.kill_and_reap(),
            };
            return Err(self.crashed(exit));
        }
        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StreamError> {
        if self.process.is_none() {
            if self.state != ProcessState::Uninitialized {
                self.state = ProcessState::Closed;
            }
            return Ok(());
        }
        if self.state == ProcessState::Running {
            self.state = ProcessState::Draining;
        }

        if let Some(process) = self.process.as_mut() {
            match process.close_input() {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    log::debug!("ProcessEncoder: input already closed by encoder");
                }
                Err(err) => log::warn!("ProcessEncoder: closing encoder input: {}", err),
            }
        }

        let mut result = Ok(());
        let exit = match self.wait_for_exit(self.close_timeout) {
            Some(exit) => Some(exit),
            None => {
                log::warn!(
                    "ProcessEncoder: {} did not exit within {:?}, killing",
                    self.program,
                    self.close_timeout
                );
                if let Some(process) = self.process.as_mut() {
                    if let Err(err) = process.kill() {
                        result = Err(StreamError::StageFailed {
                            stage: "transport-close",
                            reason: format!("kill {}: {}", self.program, err),
                        });
                    }
                }
                self.wait_for_exit(self.close_timeout)
            }
        };

        if let Some(mut drain) = self.drain.take() {
            if exit.is_some() {
                drain.join(DRAIN_JOIN_TIMEOUT);
            }
        }
        self.process = None;
        if self.state == ProcessState::Draining {
            log::info!(
                "ProcessEncoder: closed after {} frames ({})",
                self.frames_written,
                exit.map(|e| e.to_string())
                    .unwrap_or_else(|| "exit not observed".to_string())
            );
        }
        self.state = ProcessState::Closed;
        result
    }

    fn is_open(&self) -> bool {
        self.state == ProcessState::Running
    }

    fn encoder(&self) -> Option<String> {
        match self.state {
            ProcessState::Running | ProcessState::Draining | ProcessState::Crashed => {
                Some(self.program.clone())
            }
            _ => None,
        }
    }
}

impl Drop for ProcessEncoderBackend {
    fn drop(&mut self) {
        if self.process.is_some() {
            let _ = self.close();
        }
    }
}

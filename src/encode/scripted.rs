//! Scripted transport doubles.
//!
//! `ScriptedExecutor` stands in for a multimedia framework and `ScriptedLauncher`
//! for an external encoder process. Both record what the backends asked of them
//! in a shared log that stays readable after the backend is moved into a session.

use std::io::{self, Cursor, Read};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use super::pipeline::{CodecTag, PipelineExecutor, PipelineSink, SinkFormat};
use super::process::{EncoderProcess, ProcessExit, ProcessLauncher};
use crate::frame::Frame;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ----------------------------------------------------------------------------
// Pipeline executor
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ExecutorRecord {
    probes: Vec<(String, CodecTag)>,
    frames: Vec<Frame>,
    sinks_closed: u32,
}

/// What a `ScriptedExecutor` was asked to do.
#[derive(Clone, Debug, Default)]
pub struct ExecutorLog {
    record: Arc<Mutex<ExecutorRecord>>,
}

impl ExecutorLog {
    /// Descriptor and tag of every `open_sink` call, in order.
    pub fn probes(&self) -> Vec<(String, CodecTag)> {
        lock(&self.record).probes.clone()
    }

    /// Frames pushed into opened sinks, in order.
    pub fn frames(&self) -> Vec<Frame> {
        lock(&self.record).frames.clone()
    }

    pub fn sinks_closed(&self) -> u32 {
        lock(&self.record).sinks_closed
    }
}

#[derive(Clone, Debug)]
enum Rule {
    Accept(String, Option<CodecTag>),
    Error(String),
}

/// Executor whose pipelines open according to descriptor rules.
///
/// Descriptors matching no rule report "not opened".
pub struct ScriptedExecutor {
    native: bool,
    rules: Vec<Rule>,
    push_limit: Option<usize>,
    log: ExecutorLog,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            native: true,
            rules: Vec::new(),
            push_limit: None,
            log: ExecutorLog::default(),
        }
    }

    /// Report no native transport support at all.
    pub fn without_native_transport(mut self) -> Self {
        self.native = false;
        self
    }

    /// Open descriptors containing `fragment`, with any codec tag.
    pub fn accepting(mut self, fragment: &str) -> Self {
        self.rules.push(Rule::Accept(fragment.to_string(), None));
        self
    }

    /// Open descriptors containing `fragment` only when asked with `tag`.
    pub fn accepting_tag(mut self, fragment: &str, tag: CodecTag) -> Self {
        self.rules.push(Rule::Accept(fragment.to_string(), Some(tag)));
        self
    }

    /// Fail with an error for descriptors containing `fragment`.
    pub fn erroring(mut self, fragment: &str) -> Self {
        self.rules.push(Rule::Error(fragment.to_string()));
        self
    }

    /// Sinks reject pushes once `frames` frames went through.
    pub fn failing_push_after(mut self, frames: usize) -> Self {
        self.push_limit = Some(frames);
        self
    }

    pub fn log(&self) -> ExecutorLog {
        self.log.clone()
    }
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports_native_transport(&self) -> bool {
        self.native
    }

    fn open_sink(
        &mut self,
        descriptor: &str,
        tag: CodecTag,
        _format: &SinkFormat,
    ) -> Result<Option<Box<dyn PipelineSink>>> {
        lock(&self.log.record)
            .probes
            .push((descriptor.to_string(), tag));
        for rule in &self.rules {
            match rule {
                Rule::Error(fragment) if descriptor.contains(fragment.as_str()) => {
                    return Err(anyhow!("no element for '{}'", fragment));
                }
                Rule::Accept(fragment, wanted)
                    if descriptor.contains(fragment.as_str())
                        && wanted.map_or(true, |wanted| wanted == tag) =>
                {
                    return Ok(Some(Box::new(ScriptedSink {
                        log: self.log.clone(),
                        push_limit: self.push_limit,
                        pushed: 0,
                    })));
                }
                _ => {}
            }
        }
        Ok(None)
    }
}

struct ScriptedSink {
    log: ExecutorLog,
    push_limit: Option<usize>,
    pushed: usize,
}

impl PipelineSink for ScriptedSink {
    fn push(&mut self, frame: &Frame) -> Result<()> {
        if self.push_limit.is_some_and(|limit| self.pushed >= limit) {
            return Err(anyhow!("pipeline stopped accepting buffers"));
        }
        self.pushed += 1;
        lock(&self.log.record).frames.push(frame.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        lock(&self.log.record).sinks_closed += 1;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// External encoder process
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Script {
    /// Runs until its input is closed, then exits 0.
    Healthy,
    /// Already dead when first polled.
    ExitImmediately(i32),
    /// Dies after accepting this many frames.
    ExitAfterWrites(u64, i32),
    /// Ignores input close; only a kill stops it.
    Hang,
    /// Stops reading its input after this many frames but keeps running.
    RefuseInputAfter(u64),
    /// Spawn fails with `NotFound`.
    Missing,
}

#[derive(Debug, Default)]
struct ProcessRecord {
    launches: Vec<(String, Vec<String>)>,
    writes: u64,
    input_closed: bool,
    waits: u32,
    kills: u32,
    reaped: bool,
}

/// What a `ScriptedLauncher` and its processes were asked to do.
#[derive(Clone, Debug, Default)]
pub struct ProcessLog {
    record: Arc<Mutex<ProcessRecord>>,
}

impl ProcessLog {
    pub fn launches(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.record).launches.clone()
    }

    /// Frames written successfully.
    pub fn writes(&self) -> u64 {
        lock(&self.record).writes
    }

    pub fn input_closed(&self) -> bool {
        lock(&self.record).input_closed
    }

    /// Liveness polls (`try_wait` calls).
    pub fn waits(&self) -> u32 {
        lock(&self.record).waits
    }

    pub fn kills(&self) -> u32 {
        lock(&self.record).kills
    }

    /// A poll observed the exit, so the process was reaped.
    pub fn reaped(&self) -> bool {
        lock(&self.record).reaped
    }
}

/// Launcher producing fake encoder processes that follow a script.
pub struct ScriptedLauncher {
    script: Script,
    diagnostics: Vec<String>,
    log: ProcessLog,
}

impl ScriptedLauncher {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            diagnostics: Vec::new(),
            log: ProcessLog::default(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_script(Script::Healthy)
    }

    pub fn exiting_immediately(code: i32) -> Self {
        Self::with_script(Script::ExitImmediately(code))
    }

    pub fn exiting_after(writes: u64, code: i32) -> Self {
        Self::with_script(Script::ExitAfterWrites(writes, code))
    }

    pub fn hanging() -> Self {
        Self::with_script(Script::Hang)
    }

    pub fn refusing_input_after(writes: u64) -> Self {
        Self::with_script(Script::RefuseInputAfter(writes))
    }

    pub fn missing() -> Self {
        Self::with_script(Script::Missing)
    }

    /// Lines the process prints on its diagnostic channel.
    pub fn with_diagnostics(mut self, lines: &[&str]) -> Self {
        self.diagnostics = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn log(&self) -> ProcessLog {
        self.log.clone()
    }
}

impl ProcessLauncher for ScriptedLauncher {
    fn launch(&mut self, program: &str, args: &[String]) -> io::Result<Box<dyn EncoderProcess>> {
        lock(&self.log.record)
            .launches
            .push((program.to_string(), args.to_vec()));
        if self.script == Script::Missing {
            return Err(io::Error::new(io::ErrorKind::NotFound, "No such file or directory"));
        }
        let mut diagnostics = self.diagnostics.join("\n");
        if !diagnostics.is_empty() {
            diagnostics.push('\n');
        }
        Ok(Box::new(ScriptedProcess {
            script: self.script,
            diagnostics: Some(diagnostics.into_bytes()),
            killed: false,
            log: self.log.clone(),
        }))
    }
}

struct ScriptedProcess {
    script: Script,
    diagnostics: Option<Vec<u8>>,
    killed: bool,
    log: ProcessLog,
}

impl ScriptedProcess {
    fn exit(&self) -> Option<ProcessExit> {
        if self.killed {
            return Some(ProcessExit { code: None });
        }
        let record = lock(&self.log.record);
        match self.script {
            Script::ExitImmediately(code) => Some(ProcessExit { code: Some(code) }),
            Script::ExitAfterWrites(limit, code) if record.writes >= limit => {
                Some(ProcessExit { code: Some(code) })
            }
            Script::Healthy if record.input_closed => Some(ProcessExit { code: Some(0) }),
            _ => None,
        }
    }
}

impl EncoderProcess for ScriptedProcess {
    fn id(&self) -> u32 {
        4242
    }

    fn write_frame(&mut self, _bytes: &[u8]) -> io::Result<()> {
        if self.exit().is_some() || lock(&self.log.record).input_closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Broken pipe"));
        }
        if let Script::RefuseInputAfter(limit) = self.script {
            if lock(&self.log.record).writes >= limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Broken pipe"));
            }
        }
        lock(&self.log.record).writes += 1;
        Ok(())
    }

    fn close_input(&mut self) -> io::Result<()> {
        let already_dead = self.exit().is_some();
        lock(&self.log.record).input_closed = true;
        if already_dead {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Broken pipe"));
        }
        Ok(())
    }

    fn take_diagnostics(&mut self) -> Option<Box<dyn Read + Send>> {
        self.diagnostics
            .take()
            .map(|bytes| Box::new(Cursor::new(bytes)) as Box<dyn Read + Send>)
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        let exit = self.exit();
        let mut record = lock(&self.log.record);
        record.waits += 1;
        if exit.is_some() {
            record.reaped = true;
        }
        Ok(exit)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.killed = true;
        lock(&self.log.record).kills += 1;
        Ok(())
    }
}

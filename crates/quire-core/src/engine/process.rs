//! Interactive engine subprocess.
//!
//! An [`EngineProcess`] drives one long-running interpreter over a
//! line-oriented protocol: write a command, then block until the ready
//! prompt reappears. Everything printed in between is the response.
//!
//! Output is read on a dedicated thread and handed over in chunks, so a
//! wait can be bounded and can notice that the process went away.

use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::config::EngineConfig;
use crate::error::{Error, Result};

use super::interrupt::InterruptHandle;
use super::{Engine, EngineState, ResultBlob};

/// Granularity of prompt waits.
const PROMPT_POLL: Duration = Duration::from_millis(50);

/// How long a timed-out engine gets to answer an interrupt before it is killed.
const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

/// One interactive engine subprocess.
///
/// States move `NotStarted -> Started -> Terminated`. A failed start leaves
/// the process in `NotStarted` so the next query retries; a terminated
/// process is never reused.
pub struct EngineProcess {
    config: EngineConfig,
    /// Parent of the per-query scratch directories.
    scratch_root: PathBuf,
    state: EngineState,
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    output: Option<Receiver<Vec<u8>>>,
    /// Output received but not yet consumed by a prompt wait.
    buffer: Vec<u8>,
    /// Scratch directories of executed queries, removed on teardown.
    scratch_dirs: Vec<TempDir>,
    interrupt: InterruptHandle,
}

impl EngineProcess {
    pub fn new(config: EngineConfig, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            scratch_root: scratch_root.into(),
            state: EngineState::NotStarted,
            child: None,
            stdin: None,
            output: None,
            buffer: Vec::new(),
            scratch_dirs: Vec::new(),
            interrupt: InterruptHandle::new(),
        }
    }

    /// Process id of the running subprocess.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Scratch directories that are still on disk.
    pub fn scratch_dirs(&self) -> impl Iterator<Item = &Path> {
        self.scratch_dirs.iter().map(TempDir::path)
    }

    fn spawn(&mut self) -> Result<()> {
        let program = which::which(&self.config.program).map_err(|e| Error::Spawn {
            program: self.config.program.clone(),
            message: e.to_string(),
        })?;

        let mut command = if self.config.merge_stderr {
            // Let a shell point stderr at the stdout pipe, then replace itself
            // with the engine.
            let mut command = Command::new("sh");
            command
                .arg("-c")
                .arg("exec \"$@\" 2>&1")
                .arg("sh")
                .arg(&program);
            command
        } else {
            Command::new(&program)
        };
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| Error::Spawn {
            program: program.display().to_string(),
            message: e.to_string(),
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get engine stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get engine stdout".to_string()))?;

        let (tx, rx) = mpsc::channel();
        let pid = child.id();
        thread::Builder::new()
            .name(format!("quire-engine-{}", pid))
            .spawn(move || read_output(stdout, tx))?;

        tracing::info!("Spawned engine '{}' (pid {})", program.display(), pid);
        self.interrupt.set_process_group(Some(pid));
        self.child = Some(child);
        self.stdin = Some(BufWriter::new(stdin));
        self.output = Some(rx);
        self.buffer.clear();
        Ok(())
    }

    /// Run the fixed init sequence on a freshly spawned process.
    fn initialize(&mut self) -> Result<()> {
        if let Some(probe) = self.config.ready_probe.clone() {
            self.write_line(&probe)?;
        }
        self.wait_for_prompt()?;

        for command in self.config.init_commands.clone() {
            self.send_command(&command)?;
            self.wait_for_prompt()?;
        }
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(Error::Terminated)?;
        writeln!(stdin, "{}", line).map_err(|_| Error::EngineExited)?;
        stdin.flush().map_err(|_| Error::EngineExited)
    }

    /// Send one command, followed by the ready probe if configured.
    fn send_command(&mut self, command: &str) -> Result<()> {
        tracing::trace!("engine <- {:?}", command);
        self.write_line(command)?;
        if let Some(probe) = self.config.ready_probe.clone() {
            self.write_line(&probe)?;
        }
        Ok(())
    }

    /// Block until the prompt appears, returning the output before it.
    fn wait_for_prompt(&mut self) -> Result<String> {
        let prompt = self.config.prompt.as_bytes().to_vec();
        let timeout = self.config.query_timeout();
        let started = Instant::now();
        let mut interrupted_at: Option<Instant> = None;

        loop {
            if let Some(pos) = find(&self.buffer, &prompt) {
                let text = String::from_utf8_lossy(&self.buffer[..pos]).into_owned();
                self.buffer.drain(..pos + prompt.len());
                return Ok(text);
            }

            let output = self.output.as_ref().ok_or(Error::Terminated)?;
            match output.recv_timeout(PROMPT_POLL) {
                Ok(chunk) => {
                    tracing::trace!("engine -> {:?}", String::from_utf8_lossy(&chunk));
                    self.buffer.extend_from_slice(&chunk);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let Some(limit) = timeout else {
                        continue;
                    };
                    match interrupted_at {
                        None if started.elapsed() >= limit => {
                            tracing::warn!(
                                "Engine did not answer within {} ms, interrupting",
                                limit.as_millis()
                            );
                            self.interrupt.signal();
                            interrupted_at = Some(Instant::now());
                        }
                        Some(at) if at.elapsed() >= INTERRUPT_GRACE => {
                            return Err(Error::EngineTimeout(limit.as_millis() as u64));
                        }
                        _ => {}
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Error::EngineExited),
            }
        }
    }

    /// Change into the scratch directory, then evaluate `source`.
    ///
    /// Returns `None` when an interrupt arrived in between.
    fn exchange(&mut self, scratch: &Path, source: &str) -> Result<Option<String>> {
        let chdir = self.config.chdir_command(scratch);
        self.send_command(&chdir)?;
        self.wait_for_prompt()?;
        if self.interrupt.is_requested() {
            return Ok(None);
        }

        let command = self.config.query_command(source);
        self.send_command(&command)?;
        let text = self.wait_for_prompt()?;
        if self.interrupt.is_requested() {
            return Ok(None);
        }
        Ok(Some(text))
    }

    /// Drop output that arrived after the last prompt.
    fn discard_pending(&mut self) {
        if let Some(output) = self.output.as_ref() {
            while let Ok(chunk) = output.try_recv() {
                tracing::debug!("Discarding stray engine output ({} bytes)", chunk.len());
            }
        }
        self.buffer.clear();
    }

    /// Kill the process and forget it. Scratch directories are kept.
    fn kill(&mut self) {
        self.interrupt.kill();
        self.interrupt.set_process_group(None);
        self.stdin = None;
        self.output = None;
        self.buffer.clear();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill()
                && e.kind() != std::io::ErrorKind::InvalidInput
            {
                tracing::debug!("Failed to kill engine: {}", e);
            }
            // Reap the zombie
            let _ = child.wait();
        }
    }
}

impl Engine for EngineProcess {
    fn state(&self) -> EngineState {
        self.state
    }

    fn start(&mut self) -> Result<()> {
        match self.state {
            EngineState::Started => return Ok(()),
            EngineState::Terminated => return Err(Error::Terminated),
            EngineState::NotStarted => {}
        }

        self.spawn()?;
        if let Err(e) = self.initialize() {
            tracing::warn!("Engine failed to initialize: {}", e);
            self.kill();
            return Err(e);
        }
        self.state = EngineState::Started;
        Ok(())
    }

    fn run(&mut self, source: &str) -> Result<Option<ResultBlob>> {
        self.start()?;

        let scratch = tempfile::Builder::new()
            .prefix("quire-")
            .tempdir_in(&self.scratch_root)?;
        let path = scratch.path().to_path_buf();
        self.scratch_dirs.push(scratch);

        self.discard_pending();
        if !self.interrupt.begin() {
            return Ok(None);
        }
        let outcome = self.exchange(&path, source);
        self.interrupt.end();

        let text = match outcome {
            Ok(Some(text)) => text,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!("Engine failed while running a query: {}", e);
                self.teardown();
                return Err(e);
            }
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        files.sort();

        Ok(Some(ResultBlob { text, files, path }))
    }

    fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    fn teardown(&mut self) {
        if self.state == EngineState::Terminated {
            return;
        }
        self.kill();
        for dir in self.scratch_dirs.drain(..) {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!("Failed to remove scratch dir {}: {}", path.display(), e);
            }
        }
        self.state = EngineState::Terminated;
        tracing::info!("Engine terminated");
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Forward engine output to the owning process until EOF.
fn read_output(mut stdout: ChildStdout, tx: Sender<Vec<u8>>) {
    let mut buf = [0u8; 4096];
    loop {
        match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("Engine output closed: {}", e);
                break;
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

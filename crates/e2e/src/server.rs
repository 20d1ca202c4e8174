//! Dev-server management - spawning, ready detection and shutdown
//!
//! A dev server signals readiness only through its log output. Each output
//! stream is pumped line by line into a [`LogStream`]; the stdout pump also
//! resolves a single-shot ready signal on the first line matching the
//! integration's pattern.

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::registry::IntegrationConfig;

/// Lines of each stream kept for diagnostics
const RECENT_LINES: usize = 50;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// What the orchestrator needs from an OS process
#[async_trait]
pub trait ProcessControl: Send {
    fn take_stdout(&mut self) -> Option<BoxedReader>;
    fn take_stderr(&mut self) -> Option<BoxedReader>;

    /// Exit status, if the process has finished
    fn try_exit(&mut self) -> std::io::Result<Option<String>>;

    /// Ask the process to stop, force-killing it after `grace`
    async fn terminate(&mut self, grace: Duration) -> std::io::Result<()>;
}

/// A spawned dev-server process (leader of its own process group on unix)
pub struct ChildProcess {
    child: Child,
    pgid: Option<u32>,
    command: String,
}

impl ChildProcess {
    pub fn spawn(program: &str, args: &[String], cwd: &Path) -> HarnessResult<Self> {
        let command = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Package-manager shims fork the real server; a group lets stop()
        // reach all of them.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| HarnessError::Spawn {
            command: command.clone(),
            source,
        })?;
        let pgid = child.id();
        debug!("Spawned `{}` (pid: {:?})", command, pgid);

        Ok(Self { child, pgid, command })
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        if let Some(pgid) = self.pgid {
            if let Err(e) = killpg(Pid::from_raw(pgid as i32), signal) {
                debug!("killpg({}, {:?}) failed: {}", pgid, signal, e);
            }
        }
    }
}

#[async_trait]
impl ProcessControl for ChildProcess {
    fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.child.stdout.take().map(|s| Box::new(s) as BoxedReader)
    }

    fn take_stderr(&mut self) -> Option<BoxedReader> {
        self.child.stderr.take().map(|s| Box::new(s) as BoxedReader)
    }

    fn try_exit(&mut self) -> std::io::Result<Option<String>> {
        Ok(self.child.try_wait()?.map(|status| status.to_string()))
    }

    async fn terminate(&mut self, grace: Duration) -> std::io::Result<()> {
        info!("Stopping `{}` (pid: {:?})", self.command, self.pgid);

        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGTERM);
        #[cfg(not(unix))]
        self.child.start_kill()?;

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                debug!("`{}` exited: {}", self.command, status?);
            }
            Err(_) => {
                warn!("`{}` ignored SIGTERM for {:?}; killing", self.command, grace);
                self.child.kill().await?;
            }
        }

        // Children that outlived the leader
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL);

        Ok(())
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            #[cfg(unix)]
            self.signal_group(nix::sys::signal::Signal::SIGKILL);
        }
    }
}

/// Handle returned by [`LogStream::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&str) + Send + Sync>;

/// One output stream of a dev server, fanned out to listeners
#[derive(Clone)]
pub struct LogStream {
    inner: Arc<LogStreamInner>,
}

struct LogStreamInner {
    name: &'static str,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    recent: Mutex<VecDeque<String>>,
    next_id: AtomicU64,
}

impl LogStream {
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(LogStreamInner {
                name,
                listeners: Mutex::new(Vec::new()),
                recent: Mutex::new(VecDeque::with_capacity(RECENT_LINES)),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn subscribe(&self, listener: impl Fn(&str) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Most recent lines, oldest first
    pub fn recent_lines(&self) -> Vec<String> {
        self.inner.recent.lock().iter().cloned().collect()
    }

    fn publish(&self, line: &str) {
        {
            let mut recent = self.inner.recent.lock();
            if recent.len() == RECENT_LINES {
                recent.pop_front();
            }
            recent.push_back(line.to_string());
        }

        // Call outside the lock so a listener may unsubscribe itself.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(line);
        }
    }
}

/// Progress of the ready signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState {
    Pending,
    /// Carries the first matching line
    Ready(String),
    /// stdout ended without a match
    Closed,
}

struct ReadyWatch {
    pattern: Regex,
    tx: watch::Sender<ReadyState>,
}

impl ReadyWatch {
    fn offer(&self, line: &str) {
        if !self.pattern.is_match(&strip_ansi(line)) {
            return;
        }
        self.tx.send_if_modified(|state| {
            if *state == ReadyState::Pending {
                *state = ReadyState::Ready(line.to_string());
                true
            } else {
                false
            }
        });
    }

    fn close(&self) {
        self.tx.send_if_modified(|state| {
            if *state == ReadyState::Pending {
                *state = ReadyState::Closed;
                true
            } else {
                false
            }
        });
    }
}

fn spawn_pump(reader: BoxedReader, stream: LogStream, ready: Option<ReadyWatch>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    let line = text.trim_end_matches(['\n', '\r']);
                    stream.publish(line);
                    if let Some(ready) = &ready {
                        ready.offer(line);
                    }
                }
                Err(e) => {
                    warn!("Reading {} failed: {}", stream.name(), e);
                    break;
                }
            }
        }

        debug!("{} closed", stream.name());
        if let Some(ready) = &ready {
            ready.close();
        }
    })
}

/// A running dev server bound to one workspace
pub struct ServerProcess {
    integration_id: String,
    process: Box<dyn ProcessControl>,
    stdout: LogStream,
    stderr: LogStream,
    ready: watch::Receiver<ReadyState>,
    stdout_pump: Option<JoinHandle<()>>,
    stderr_pump: Option<JoinHandle<()>>,
    relays: Vec<(LogStream, SubscriptionId)>,
}

impl ServerProcess {
    /// Spawn the integration's dev server inside `cwd`
    pub fn start(config: &IntegrationConfig, cwd: &Path, verbose: bool) -> HarnessResult<Self> {
        let (program, args) = config.command_line(cwd);
        info!("Starting {} dev server on port {}", config.id, config.listen_port);
        let child = ChildProcess::spawn(&program, &args, cwd)?;
        Ok(Self::attach(
            &config.id,
            config.ready_pattern.clone(),
            Box::new(child),
            verbose,
        ))
    }

    /// Wire up output pumps and ready detection for an already running process
    pub fn attach(
        integration_id: &str,
        ready_pattern: Regex,
        mut process: Box<dyn ProcessControl>,
        verbose: bool,
    ) -> Self {
        let stdout = LogStream::new("stdout");
        let stderr = LogStream::new("stderr");
        let (tx, ready) = watch::channel(ReadyState::Pending);

        let mut relays = Vec::new();
        if verbose {
            let id = integration_id.to_string();
            relays.push((
                stdout.clone(),
                stdout.subscribe(move |line| info!(integration = %id, "[SERVER LOG]: {}", line)),
            ));
            let id = integration_id.to_string();
            relays.push((
                stderr.clone(),
                stderr.subscribe(move |line| {
                    warn!(integration = %id, "[ERROR SERVER LOG]: {}", line)
                }),
            ));
        }

        let ready_watch = ReadyWatch { pattern: ready_pattern, tx };
        let stdout_pump = match process.take_stdout() {
            Some(out) => Some(spawn_pump(out, stdout.clone(), Some(ready_watch))),
            None => {
                ready_watch.close();
                None
            }
        };
        let stderr_pump = process
            .take_stderr()
            .map(|err| spawn_pump(err, stderr.clone(), None));

        Self {
            integration_id: integration_id.to_string(),
            process,
            stdout,
            stderr,
            ready,
            stdout_pump,
            stderr_pump,
            relays,
        }
    }

    pub fn stdout(&self) -> &LogStream {
        &self.stdout
    }

    pub fn stderr(&self) -> &LogStream {
        &self.stderr
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready.borrow().clone()
    }

    /// Wait for the ready line. Fails if the server exits first or stays
    /// silent for `limit`; returns the matching line.
    pub async fn wait_ready(&mut self, limit: Duration) -> HarnessResult<String> {
        let mut rx = self.ready.clone();
        let waited = tokio::time::timeout(limit, async {
            rx.wait_for(|s| *s != ReadyState::Pending)
                .await
                .map(|state| (*state).clone())
        })
        .await;

        match waited {
            Ok(Ok(ReadyState::Ready(line))) => {
                info!("{} dev server is ready: {}", self.integration_id, line.trim());
                Ok(line)
            }
            Ok(Ok(ReadyState::Pending)) | Ok(Ok(ReadyState::Closed)) | Ok(Err(_)) => {
                let status = self.exit_status(Duration::from_millis(500)).await;
                self.drain_stderr(Duration::from_millis(500)).await;
                Err(HarnessError::ServerExited {
                    integration: self.integration_id.clone(),
                    status,
                    stderr_tail: self.stderr.recent_lines().join("\n"),
                })
            }
            Err(_) => {
                let mut recent = self.stdout.recent_lines();
                recent.extend(self.stderr.recent_lines());
                Err(HarnessError::ReadyTimeout {
                    integration: self.integration_id.clone(),
                    timeout_ms: limit.as_millis() as u64,
                    recent_output: recent.join("\n"),
                })
            }
        }
    }

    async fn exit_status(&mut self, wait: Duration) -> String {
        let start = Instant::now();
        loop {
            match self.process.try_exit() {
                Ok(Some(status)) => return status,
                Ok(None) if start.elapsed() < wait => sleep(Duration::from_millis(20)).await,
                Ok(None) => return "stdout closed, process still running".to_string(),
                Err(e) => return format!("unknown ({})", e),
            }
        }
    }

    /// Give the stderr pump a moment to catch up with a dead process
    async fn drain_stderr(&mut self, wait: Duration) {
        if let Some(pump) = self.stderr_pump.as_mut() {
            if !pump.is_finished() {
                let _ = tokio::time::timeout(wait, pump).await;
            }
        }
    }

    pub fn has_exited(&mut self) -> bool {
        self.process.try_exit().map(|s| s.is_some()).unwrap_or(true)
    }

    /// Remove the verbose relays; returns how many were attached
    pub fn detach_listeners(&mut self) -> usize {
        let count = self.relays.len();
        for (stream, id) in self.relays.drain(..) {
            stream.unsubscribe(id);
        }
        count
    }

    /// Terminate the server and stop pumping its output
    pub async fn stop(&mut self, grace: Duration) -> HarnessResult<()> {
        self.detach_listeners();
        let result = self.process.terminate(grace).await;
        for pump in [self.stdout_pump.take(), self.stderr_pump.take()].into_iter().flatten() {
            pump.abort();
        }
        result.map_err(HarnessError::from)
    }
}

/// Wait until something answers HTTP at `url`. Any status counts: the dev
/// server only has to be accepting connections.
pub async fn wait_for_http(url: &str, limit: Duration) -> HarnessResult<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let start = Instant::now();
    let mut attempts = 0;

    while start.elapsed() < limit {
        attempts += 1;

        match client.get(url).send().await {
            Ok(resp) => {
                debug!("{} answered {} after {} attempt(s)", url, resp.status(), attempts);
                return Ok(());
            }
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for {} to accept connections...", url);
                }
                // Connection refused is expected while the server binds
                if !e.is_connect() {
                    warn!("HTTP check error: {}", e);
                }
            }
        }

        sleep(Duration::from_millis(100)).await;
    }

    Err(HarnessError::ServerUnreachable {
        url: url.to_string(),
        timeout_ms: limit.as_millis() as u64,
    })
}

/// Drop ANSI CSI sequences (colours, cursor moves) from a log line
pub fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            // parameters and intermediates, then one final byte in @..~
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }

    out
}

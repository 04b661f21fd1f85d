//! Process management for the CLI subprocess

use super::framing::LineBuffer;
use crate::error::{Result, TransportError};
use crate::traits::{Transport, TransportEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

/// Environment variable overriding the default CLI executable
pub const CLI_PATH_ENV: &str = "CLAUDEWIRE_CLI_PATH";

const READ_CHUNK: usize = 8192;
const EXIT_WAIT_AFTER_EOF: Duration = Duration::from_secs(5);

/// Callback receiving each stderr line of the subprocess
pub type StderrCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Configuration for spawning a CLI process
#[derive(Clone)]
pub struct ProcessConfig {
    /// Path to the CLI executable
    pub program: String,

    /// Arguments to pass to the CLI
    pub args: Vec<String>,

    /// Environment variables to set
    pub env: HashMap<String, String>,

    /// Working directory
    pub cwd: Option<PathBuf>,

    /// Whether the child inherits the parent environment before `env` is applied
    pub inherit_env: bool,

    /// How long `close` waits after closing stdin, and again after SIGTERM
    pub close_grace: Duration,

    /// Receives stderr lines
    pub stderr: Option<StderrCallback>,
}

impl std::fmt::Debug for ProcessConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessConfig")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("cwd", &self.cwd)
            .field("inherit_env", &self.inherit_env)
            .field("close_grace", &self.close_grace)
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

impl Default for ProcessConfig {
    /// The CLI in bidirectional stream-json mode
    ///
    /// The executable is taken from `CLAUDEWIRE_CLI_PATH` when set.
    fn default() -> Self {
        let program = std::env::var(CLI_PATH_ENV).unwrap_or_else(|_| "claude".to_string());
        Self::new(program)
            .with_arg("--output-format")
            .with_arg("stream-json")
            .with_arg("--input-format")
            .with_arg("stream-json")
            .with_arg("--verbose")
    }
}

impl ProcessConfig {
    /// Create a configuration for an arbitrary executable with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            inherit_env: true,
            close_grace: Duration::from_secs(2),
            stderr: None,
        }
    }

    /// Add an argument
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Control environment inheritance
    ///
    /// With inheritance disabled only variables set via [`ProcessConfig::with_env`]
    /// reach the child.
    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    /// Set the close grace period
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Route stderr lines to a callback
    pub fn with_stderr_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.stderr = Some(Arc::new(callback));
        self
    }
}

/// Fan-out state shared with the reader task
///
/// Events arriving before the first subscriber are held in `backlog` and
/// replayed to it, so a CLI that writes immediately on start loses nothing.
struct Subscribers {
    senders: Vec<mpsc::UnboundedSender<TransportEvent>>,
    backlog: Option<Vec<TransportEvent>>,
    exited: Option<Option<i32>>,
}

impl Default for Subscribers {
    fn default() -> Self {
        Self {
            senders: Vec::new(),
            backlog: Some(Vec::new()),
            exited: None,
        }
    }
}

impl Subscribers {
    fn broadcast(&mut self, event: TransportEvent) {
        if let Some(backlog) = &mut self.backlog {
            backlog.push(event);
            return;
        }
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

type SharedSubscribers = Arc<StdMutex<Subscribers>>;

fn lock(subscribers: &SharedSubscribers) -> std::sync::MutexGuard<'_, Subscribers> {
    subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Transport over a spawned CLI process
///
/// A reader task splits stdout into lines and fans them out to every
/// subscriber; a second task drains stderr; a third owns the child and
/// publishes its exit. Writes go through one lock so each line lands whole.
pub struct SubprocessTransport {
    stdin: Mutex<Option<ChildStdin>>,
    subscribers: SharedSubscribers,
    exit: watch::Receiver<Option<Option<i32>>>,
    kill: StdMutex<Option<oneshot::Sender<()>>>,
    alive: Arc<AtomicBool>,
    closed: AtomicBool,
    pid: Option<u32>,
    config: ProcessConfig,
}

impl std::fmt::Debug for SubprocessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessTransport")
            .field("program", &self.config.program)
            .field("pid", &self.pid)
            .field("alive", &self.alive.load(Ordering::SeqCst))
            .finish()
    }
}

impl SubprocessTransport {
    /// Spawn the CLI process and start its I/O tasks
    ///
    /// Must be called from within a tokio runtime. A missing or unspawnable
    /// executable is reported as [`TransportError::Spawn`].
    pub fn spawn(config: ProcessConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args);

        if !config.inherit_env {
            cmd.env_clear();
        }
        cmd.envs(&config.env);

        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            program: config.program.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Process("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Process("Failed to get stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Process("Failed to get stderr".to_string()))?;

        let pid = child.id();
        debug!(program = %config.program, pid = ?pid, "spawned CLI process");

        let alive = Arc::new(AtomicBool::new(true));
        let subscribers: SharedSubscribers = Arc::new(StdMutex::new(Subscribers::default()));
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(wait_for_exit(child, kill_rx, exit_tx, Arc::clone(&alive)));
        tokio::spawn(read_stdout(
            stdout,
            Arc::clone(&subscribers),
            exit_rx.clone(),
        ));
        tokio::spawn(read_stderr(stderr, config.stderr.clone()));

        Ok(Self {
            stdin: Mutex::new(Some(stdin)),
            subscribers,
            exit: exit_rx,
            kill: StdMutex::new(Some(kill_tx)),
            alive,
            closed: AtomicBool::new(false),
            pid,
            config,
        })
    }

    /// OS process id, if the process was running when spawned
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Get the process configuration
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Wait until the process has exited, returning its exit code
    pub async fn wait(&self) -> Option<i32> {
        let mut exit = self.exit.clone();
        match exit.wait_for(|state| state.is_some()).await {
            Ok(state) => state.flatten(),
            Err(_) => None,
        }
    }

    async fn wait_with_timeout(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.wait()).await.is_ok()
    }

    fn force_kill(&self) {
        let sender = self
            .kill
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    #[cfg(unix)]
    fn terminate(&self) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(pid) = self.pid {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(pid, error = %e, "SIGTERM failed");
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) {
        self.force_kill();
    }
}

#[async_trait]
impl Transport for SubprocessTransport {
    async fn send_line(&self, line: &str) -> Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        if !buf.ends_with('\n') {
            buf.push('\n');
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
        stdin.write_all(buf.as_bytes()).await?;
        stdin.flush().await?;
        trace!(bytes = buf.len(), "wrote line to CLI");
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = lock(&self.subscribers);
        if let Some(backlog) = subscribers.backlog.take() {
            for event in backlog {
                let _ = tx.send(event);
            }
            // the backlog already ends with the exit event
            if subscribers.exited.is_some() {
                return rx;
            }
        } else if let Some(code) = subscribers.exited {
            let _ = tx.send(TransportEvent::Exited { code });
            return rx;
        }
        subscribers.senders.push(tx);
        rx
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(mut stdin) = self.stdin.lock().await.take() {
            if let Err(e) = stdin.flush().await {
                debug!(error = %e, "flush on close failed");
            }
            if let Err(e) = stdin.shutdown().await {
                debug!(error = %e, "stdin shutdown on close failed");
            }
        }

        let grace = self.config.close_grace;
        if self.wait_with_timeout(grace).await {
            return Ok(());
        }

        debug!(pid = ?self.pid, "CLI still running after stdin closed, sending SIGTERM");
        self.terminate();
        if self.wait_with_timeout(grace).await {
            return Ok(());
        }

        warn!(pid = ?self.pid, "CLI ignored SIGTERM, killing");
        self.force_kill();
        self.wait().await;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

async fn wait_for_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<Option<i32>>>,
    alive: Arc<AtomicBool>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "kill failed");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(error = %e, "failed to wait for CLI process");
            None
        }
    };
    debug!(code = ?code, "CLI process exited");
    alive.store(false, Ordering::SeqCst);
    let _ = exit_tx.send(Some(code));
}

async fn read_stdout(
    mut stdout: ChildStdout,
    subscribers: SharedSubscribers,
    mut exit: watch::Receiver<Option<Option<i32>>>,
) {
    let mut framing = LineBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let lines = framing.push(&chunk[..n]);
                if lines.is_empty() {
                    continue;
                }
                let mut subscribers = lock(&subscribers);
                for line in lines {
                    subscribers.broadcast(TransportEvent::Line(line));
                }
            }
            Err(e) => {
                warn!(error = %e, "error reading CLI stdout");
                break;
            }
        }
    }

    if let Some(rest) = framing.finish() {
        lock(&subscribers).broadcast(TransportEvent::Line(rest));
    }

    let code = match tokio::time::timeout(
        EXIT_WAIT_AFTER_EOF,
        exit.wait_for(|state| state.is_some()),
    )
    .await
    {
        Ok(Ok(state)) => state.flatten(),
        _ => None,
    };

    let mut subscribers = lock(&subscribers);
    subscribers.broadcast(TransportEvent::Exited { code });
    subscribers.senders.clear();
    subscribers.exited = Some(code);
}

async fn read_stderr(stderr: ChildStderr, callback: Option<StderrCallback>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(target: "claudewire::stderr", "{}", line);
                if let Some(callback) = &callback {
                    callback(&line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "error reading CLI stderr");
                break;
            }
        }
    }
}

//! Bridge handle: owns one reasoning subprocess and its pipes.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::{Frame, LineReader, LineWriter, MalformedMessage};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::wire::{BridgeReply, BridgeRequest};

/// Snapshot of a bridge for health reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeStatus {
    pub running: bool,
    pub process_alive: bool,
    pub buffered_responses: usize,
    pub model: Option<String>,
    pub recent_errors: Vec<String>,
}

/// Child stderr plus rejected stdout lines, newest last.
struct ErrorChannel {
    tail: Mutex<VecDeque<String>>,
    capacity: usize,
    log: Mutex<Option<File>>,
}

impl ErrorChannel {
    fn new(capacity: usize) -> Self {
        Self {
            tail: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            log: Mutex::new(None),
        }
    }

    fn open_log(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(
            file,
            "\n=== bridge session started at {:.3} ===",
            reverie_types::now_epoch_secs()
        )?;
        *self.log.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
        Ok(())
    }

    fn record(&self, line: &str) {
        {
            let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
            if self.capacity > 0 {
                if tail.len() == self.capacity {
                    tail.pop_front();
                }
                tail.push_back(line.to_string());
            }
        }

        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(file) = log.as_mut()
            && let Err(e) = writeln!(file, "{line}")
        {
            tracing::debug!("Bridge error log write failed: {e}");
        }
    }

    fn record_malformed(&self, message: &MalformedMessage) {
        tracing::warn!("Dropping bridge output: {message}");
        self.record(&message.to_string());
    }

    fn recent(&self, n: usize) -> Vec<String> {
        let tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
        tail.iter().skip(tail.len().saturating_sub(n)).cloned().collect()
    }
}

struct RunningBridge {
    child: Child,
    writer: LineWriter<ChildStdin>,
    replies: mpsc::Receiver<BridgeReply>,
    model: Option<String>,
    awaiting_reply: bool,
    reader_handle: JoinHandle<()>,
    stderr_handle: JoinHandle<()>,
}

/// One long-lived reasoning subprocess speaking line-delimited JSON.
///
/// Replies carry no correlation id, so at most one request may be
/// outstanding; a second `send` before its reply is polled fails with
/// [`BridgeError::RequestInFlight`].
pub struct ModelBridge {
    config: BridgeConfig,
    errors: Arc<ErrorChannel>,
    process: Option<RunningBridge>,
}

impl ModelBridge {
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        let errors = Arc::new(ErrorChannel::new(config.error_tail));
        Self {
            config,
            errors,
            process: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// Whether a request was sent and its reply has not been read yet.
    #[must_use]
    pub fn awaiting_reply(&self) -> bool {
        self.process.as_ref().is_some_and(|p| p.awaiting_reply)
    }

    /// Whether the child process is still running at the OS level.
    pub fn is_alive(&mut self) -> bool {
        self.process
            .as_mut()
            .is_some_and(|p| matches!(p.child.try_wait(), Ok(None)))
    }

    /// Model name announced in the ready signal.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.process.as_ref().and_then(|p| p.model.as_deref())
    }

    /// Launch the subprocess and wait for its ready signal.
    ///
    /// On timeout or early exit the child is killed and reaped before the
    /// error is returned. Starting an already running bridge is a no-op.
    pub async fn start(&mut self) -> Result<(), BridgeError> {
        if self.process.is_some() {
            return Ok(());
        }

        if let Some(path) = &self.config.error_log {
            self.errors
                .open_log(path)
                .map_err(|source| BridgeError::ErrorLog {
                    path: path.clone(),
                    source,
                })?;
        }

        let command = self.config.command.clone();
        let resolved =
            which::which(&command).map_err(|source| BridgeError::CommandNotFound {
                command: command.clone(),
                source,
            })?;
        let mut cmd = Command::new(&resolved);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| BridgeError::Spawn {
            command: command.clone(),
            source,
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            reap(&mut child).await;
            return Err(BridgeError::Spawn {
                command,
                source: std::io::Error::other("child pipes unavailable"),
            });
        };

        let (reply_tx, mut replies) = mpsc::channel(self.config.buffer_capacity.max(1));
        let reader_handle = tokio::spawn(read_replies(
            LineReader::with_limit(stdout, self.config.max_line_bytes),
            reply_tx,
            Arc::clone(&self.errors),
        ));
        let stderr_handle = tokio::spawn(drain_stderr(stderr, Arc::clone(&self.errors)));

        let ready =
            tokio::time::timeout(self.config.startup_timeout, wait_for_ready(&mut replies)).await;

        match ready {
            Ok(Some(signal)) => {
                tracing::info!(
                    command = %command,
                    model = signal.model.as_deref().unwrap_or("unknown"),
                    "Bridge ready"
                );
                self.process = Some(RunningBridge {
                    child,
                    writer: LineWriter::new(stdin),
                    replies,
                    model: signal.model,
                    awaiting_reply: false,
                    reader_handle,
                    stderr_handle,
                });
                Ok(())
            }
            outcome => {
                tracing::warn!(
                    command = %command,
                    exited_early = matches!(outcome, Ok(None)),
                    "Bridge failed to signal ready"
                );
                reap(&mut child).await;
                reader_handle.abort();
                stderr_handle.abort();
                Err(BridgeError::StartupTimeout {
                    timeout: self.config.startup_timeout,
                })
            }
        }
    }

    /// Write one request line. Does not wait for the reply.
    pub async fn send(&mut self, request: &BridgeRequest) -> Result<(), BridgeError> {
        let process = self.process.as_mut().ok_or(BridgeError::NotRunning)?;
        if process.awaiting_reply {
            return Err(BridgeError::RequestInFlight);
        }
        process
            .writer
            .write_message(request)
            .await
            .map_err(BridgeError::Write)?;
        process.awaiting_reply = true;
        tracing::debug!(thought_id = %request.id, kind = %request.kind, "Sent request to bridge");
        Ok(())
    }

    /// Wait up to `budget` for the first reply, then drain whatever else is
    /// already buffered.
    pub async fn poll_responses(&mut self, budget: Duration) -> Vec<BridgeReply> {
        let Some(process) = self.process.as_mut() else {
            return Vec::new();
        };

        let mut replies = Vec::new();
        if let Ok(Some(first)) = tokio::time::timeout(budget, process.replies.recv()).await {
            replies.push(first);
            while let Ok(next) = process.replies.try_recv() {
                replies.push(next);
            }
        }
        if !replies.is_empty() {
            process.awaiting_reply = false;
        }
        replies
    }

    /// Send a request and wait for its reply.
    pub async fn request(
        &mut self,
        request: &BridgeRequest,
        timeout: Duration,
    ) -> Result<BridgeReply, BridgeError> {
        self.send(request).await?;
        let process = self.process.as_mut().ok_or(BridgeError::NotRunning)?;

        match tokio::time::timeout(timeout, process.replies.recv()).await {
            Ok(Some(reply)) => {
                process.awaiting_reply = false;
                if reply.thought_id.as_deref().is_some_and(|id| id != request.id) {
                    tracing::debug!(
                        expected = %request.id,
                        got = reply.thought_id.as_deref().unwrap_or_default(),
                        "Bridge reply id differs from request"
                    );
                }
                Ok(reply)
            }
            Ok(None) => Err(BridgeError::ProcessExited),
            Err(_) => Err(BridgeError::ResponseTimeout(timeout)),
        }
    }

    /// Close stdin, wait the grace period, then kill.
    pub async fn stop(&mut self) {
        let Some(process) = self.process.take() else {
            return;
        };
        let RunningBridge {
            mut child,
            writer,
            replies,
            reader_handle,
            stderr_handle,
            ..
        } = process;

        drop(writer);
        drop(replies);

        if tokio::time::timeout(self.config.shutdown_grace, child.wait())
            .await
            .is_err()
        {
            tracing::debug!(command = %self.config.command, "Bridge didn't exit in time, killing");
            reap(&mut child).await;
        }
        reader_handle.abort();
        stderr_handle.abort();
    }

    /// Stop, pause briefly, start again.
    pub async fn restart(&mut self) -> Result<(), BridgeError> {
        tracing::info!(command = %self.config.command, "Restarting bridge");
        self.stop().await;
        tokio::time::sleep(self.config.restart_pause).await;
        self.start().await
    }

    /// Last `n` lines of the error channel, oldest first.
    #[must_use]
    pub fn recent_errors(&self, n: usize) -> Vec<String> {
        self.errors.recent(n)
    }

    pub fn status(&mut self) -> BridgeStatus {
        let recent_errors = self.errors.recent(self.config.error_tail);
        match self.process.as_mut() {
            Some(process) => BridgeStatus {
                running: true,
                process_alive: matches!(process.child.try_wait(), Ok(None)),
                buffered_responses: process.replies.len(),
                model: process.model.clone(),
                recent_errors,
            },
            None => BridgeStatus {
                running: false,
                process_alive: false,
                buffered_responses: 0,
                model: None,
                recent_errors,
            },
        }
    }
}

async fn reap(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::debug!("Bridge kill failed: {e}");
    }
    let _ = child.wait().await;
}

async fn wait_for_ready(replies: &mut mpsc::Receiver<BridgeReply>) -> Option<BridgeReply> {
    while let Some(reply) = replies.recv().await {
        if reply.is_ready() {
            return Some(reply);
        }
        tracing::debug!(status = %reply.status, "Ignoring bridge output before ready");
    }
    None
}

async fn read_replies<R: AsyncRead + Unpin>(
    mut reader: LineReader<R>,
    tx: mpsc::Sender<BridgeReply>,
    errors: Arc<ErrorChannel>,
) {
    loop {
        match reader.next_frame().await {
            Ok(Some(Frame::Message(map))) => {
                match serde_json::from_value::<BridgeReply>(serde_json::Value::Object(map)) {
                    Ok(reply) => {
                        if tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => errors.record_malformed(&MalformedMessage {
                        reason: format!("unexpected reply shape: {e}"),
                        excerpt: String::new(),
                    }),
                }
            }
            Ok(Some(Frame::Malformed(message))) => errors.record_malformed(&message),
            Ok(None) => {
                tracing::debug!("Bridge closed stdout");
                break;
            }
            Err(e) => {
                errors.record(&format!("stdout read error: {e}"));
                break;
            }
        }
    }
}

async fn drain_stderr<R: AsyncRead + Unpin>(stderr: R, errors: Arc<ErrorChannel>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::trace!("bridge stderr: {line}");
        errors.record(&line);
    }
}

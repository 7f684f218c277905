//! Engine process spawning and I/O.
//!
//! A spawned [`EngineProcess`] is driven by one supervisor task that owns the
//! `Child`. Stdout and stderr are read as line streams on their own tasks and
//! forwarded over an unbounded channel. The supervisor sends exactly one
//! [`ProcessEvent::Exit`], after stdout has drained, whichever of natural exit,
//! cancellation or supersession ended the process.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};

use crate::logging::{self, Direction, LogHandle};
use crate::shell::build_login_shell_command;

/// How long to wait for the output readers after the process is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How the prompt reaches the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PromptDelivery {
    Argument,
    Stdin,
}

impl PromptDelivery {
    /// Stdin once the payload reaches `threshold` chars, argv below it.
    pub fn choose(payload: &str, threshold: usize) -> Self {
        if payload.chars().count() >= threshold {
            PromptDelivery::Stdin
        } else {
            PromptDelivery::Argument
        }
    }
}

/// Why a process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExitReason {
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    Cancelled,
    /// A newer process was started for the same session.
    Superseded,
}

impl ExitReason {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        ExitReason::Exited {
            code: status.code(),
            signal,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ExitReason::Exited {
                code: Some(0),
                signal: None
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    Exit(ExitReason),
}

/// Why the owner asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    Cancel,
    Supersede,
}

#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub binary_path: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Custom shell prefix (e.g. "/bin/zsh -l -c").
    pub shell_prefix: Option<String>,
    /// Written to stdin, which is then closed. `None` leaves stdin null.
    pub stdin_payload: Option<String>,
    pub grace_period: Duration,
}

impl SpawnConfig {
    pub fn new(binary_path: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            args,
            working_dir: None,
            shell_prefix: None,
            stdin_payload: None,
            grace_period: Duration::from_secs(3),
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn shell_prefix(mut self, prefix: Option<String>) -> Self {
        self.shell_prefix = prefix;
        self
    }

    pub fn stdin_payload(mut self, payload: Option<String>) -> Self {
        self.stdin_payload = payload;
        self
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

/// Control side of a running engine process.
///
/// Dropping it without calling [`EngineProcess::stop`] stops the process as
/// superseded.
pub struct EngineProcess {
    pid: Option<u32>,
    running: Arc<AtomicBool>,
    stop_tx: Option<oneshot::Sender<StopKind>>,
}

impl EngineProcess {
    /// Spawn the process and its supervisor task. Must be called inside a
    /// tokio runtime.
    pub fn spawn(
        config: SpawnConfig,
        log: LogHandle,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ProcessEvent>), SpawnError> {
        let mut cmd = build_login_shell_command(
            &config.binary_path,
            &config.args,
            config.working_dir.as_deref(),
            config.shell_prefix.as_deref(),
        )
        .map_err(SpawnError::Command)?;

        cmd.stdin(if config.stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        info!(
            "Spawning {} ({} args, stdin: {})",
            config.binary_path.display(),
            config.args.len(),
            config.stdin_payload.is_some()
        );
        let mut child = cmd.spawn().map_err(SpawnError::Io)?;
        let pid = child.id();

        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let running = Arc::new(AtomicBool::new(true));

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = stdout.map(|out| {
            tokio::spawn(forward_lines(
                out,
                tx.clone(),
                ProcessEvent::Stdout,
                log.clone(),
                Direction::Stdout,
            ))
        });
        let stderr_task = stderr.map(|err| {
            tokio::spawn(forward_lines(
                err,
                tx.clone(),
                ProcessEvent::Stderr,
                log.clone(),
                Direction::Stderr,
            ))
        });

        if let (Some(mut stdin), Some(payload)) = (child.stdin.take(), config.stdin_payload) {
            logging::log_line(&log, Direction::Stdin, &payload);
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    warn!("Failed to write prompt to stdin: {}", e);
                }
                let _ = stdin.shutdown().await;
            });
        }

        let supervisor_running = Arc::clone(&running);
        let grace = config.grace_period;
        tokio::spawn(async move {
            let reason = supervise(&mut child, stop_rx, grace).await;

            for task in [stdout_task, stderr_task].into_iter().flatten() {
                let abort = task.abort_handle();
                if tokio::time::timeout(DRAIN_TIMEOUT, task).await.is_err() {
                    debug!("Output reader did not drain in time, aborting it");
                    abort.abort();
                }
            }

            logging::log_line(&log, Direction::Exit, &format!("{reason:?}"));
            supervisor_running.store(false, Ordering::SeqCst);
            let _ = tx.send(ProcessEvent::Exit(reason));
        });

        Ok((
            Self {
                pid,
                running,
                stop_tx: Some(stop_tx),
            },
            rx,
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the supervisor to stop the process. Only the first call has effect.
    pub fn stop(&mut self, kind: StopKind) -> bool {
        match self.stop_tx.take() {
            Some(tx) => tx.send(kind).is_ok(),
            None => false,
        }
    }
}

/// Failure to start an engine process.
#[derive(Debug)]
pub enum SpawnError {
    Command(crate::error::CoreError),
    Io(std::io::Error),
}

async fn supervise(
    child: &mut Child,
    mut stop_rx: oneshot::Receiver<StopKind>,
    grace: Duration,
) -> ExitReason {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => ExitReason::from_status(status),
            Err(e) => {
                warn!("Failed to wait on engine process: {}", e);
                ExitReason::Exited { code: None, signal: None }
            }
        },
        stop = &mut stop_rx => {
            // A dropped handle counts as superseded.
            let kind = stop.unwrap_or(StopKind::Supersede);
            terminate(child, grace).await;
            match kind {
                StopKind::Cancel => ExitReason::Cancelled,
                StopKind::Supersede => ExitReason::Superseded,
            }
        }
    }
}

/// Graceful signal, bounded wait, then force kill.
///
/// Only Unix has the graceful step (SIGINT, then up to `grace`). A Windows
/// child runs without a console, so there is no console control event to
/// deliver and it is killed directly.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGINT);
        }
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        debug!("Process {} ignored SIGINT for {:?}, killing", pid, grace);
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        warn!("Failed to kill engine process: {}", e);
    }
}

async fn forward_lines<R>(
    reader: R,
    tx: mpsc::UnboundedSender<ProcessEvent>,
    wrap: fn(String) -> ProcessEvent,
    log: LogHandle,
    direction: Direction,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                logging::log_line(&log, direction, &line);
                if tx.send(wrap(line)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                // Non UTF-8 output ends the stream for this reader.
                warn!("Stopped reading engine {:?}: {}", direction, e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_config_builder() {
        let config = SpawnConfig::new("/usr/bin/echo", vec!["hello".to_string()])
            .working_dir("/tmp")
            .shell_prefix(Some("/bin/bash -c".to_string()))
            .stdin_payload(Some("prompt".to_string()))
            .grace_period(Duration::from_millis(250));

        assert_eq!(config.binary_path, PathBuf::from("/usr/bin/echo"));
        assert_eq!(config.args, vec!["hello"]);
        assert_eq!(config.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(config.shell_prefix.as_deref(), Some("/bin/bash -c"));
        assert_eq!(config.stdin_payload.as_deref(), Some("prompt"));
        assert_eq!(config.grace_period, Duration::from_millis(250));
    }

    mod delivery {
        use super::*;

        #[test]
        fn exactly_at_threshold_uses_stdin() {
            let payload = "x".repeat(100);
            assert_eq!(PromptDelivery::choose(&payload, 100), PromptDelivery::Stdin);
        }

        #[test]
        fn one_below_threshold_uses_argument() {
            let payload = "x".repeat(99);
            assert_eq!(PromptDelivery::choose(&payload, 100), PromptDelivery::Argument);
        }

        #[test]
        fn counts_chars_not_bytes() {
            let payload = "é".repeat(99);
            assert_eq!(PromptDelivery::choose(&payload, 100), PromptDelivery::Argument);
        }
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        async fn collect(mut rx: mpsc::UnboundedReceiver<ProcessEvent>) -> Vec<ProcessEvent> {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        }

        #[tokio::test]
        async fn echo_lines_then_single_exit() {
            let config = SpawnConfig::new("/bin/echo", vec!["hello".to_string()])
                .shell_prefix(Some("/bin/sh -c".to_string()));
            let (process, rx) = EngineProcess::spawn(config, logging::disabled()).unwrap();
            let events = collect(rx).await;

            assert_eq!(events[0], ProcessEvent::Stdout("hello".to_string()));
            let exits: Vec<_> = events
                .iter()
                .filter(|e| matches!(e, ProcessEvent::Exit(_)))
                .collect();
            assert_eq!(exits.len(), 1);
            assert!(matches!(events.last(), Some(ProcessEvent::Exit(r)) if r.is_success()));
            assert!(!process.is_running());
        }

        #[tokio::test]
        async fn stdin_payload_reaches_process() {
            let config = SpawnConfig::new("/bin/cat", vec![])
                .shell_prefix(Some("/bin/sh -c".to_string()))
                .stdin_payload(Some("from stdin\n".to_string()));
            let (_process, rx) = EngineProcess::spawn(config, logging::disabled()).unwrap();
            let events = collect(rx).await;
            assert_eq!(events[0], ProcessEvent::Stdout("from stdin".to_string()));
        }

        #[tokio::test]
        async fn cancel_yields_one_cancelled_exit() {
            let config = SpawnConfig::new("/bin/sleep", vec!["30".to_string()])
                .shell_prefix(Some("/bin/sh -c".to_string()))
                .grace_period(Duration::from_millis(200));
            let (mut process, rx) = EngineProcess::spawn(config, logging::disabled()).unwrap();
            assert!(process.is_running());

            assert!(process.stop(StopKind::Cancel));
            assert!(!process.stop(StopKind::Cancel));

            let events = collect(rx).await;
            assert_eq!(events, vec![ProcessEvent::Exit(ExitReason::Cancelled)]);
            assert!(!process.is_running());
        }

        #[tokio::test]
        async fn nonzero_exit_is_reported() {
            let config = SpawnConfig::new("/bin/sh", vec!["-c".to_string(), "exit 3".to_string()])
                .shell_prefix(Some("/bin/sh -c".to_string()));
            let (_process, rx) = EngineProcess::spawn(config, logging::disabled()).unwrap();
            let events = collect(rx).await;
            assert_eq!(
                events.last(),
                Some(&ProcessEvent::Exit(ExitReason::Exited {
                    code: Some(3),
                    signal: None
                }))
            );
        }

        #[tokio::test]
        async fn missing_working_dir_fails_to_spawn() {
            let config = SpawnConfig::new("/bin/echo", vec![])
                .shell_prefix(Some("/bin/sh -c".to_string()))
                .working_dir("/definitely/not/a/dir");
            assert!(matches!(
                EngineProcess::spawn(config, logging::disabled()),
                Err(SpawnError::Io(_))
            ));
        }
    }
}

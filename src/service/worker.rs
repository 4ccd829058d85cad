//! Service workers
//!
//! A worker takes over the bound listener and serves the application.
//! `CommandWorker` runs the configured server command; `ListenerWorker`
//! holds the socket itself and accepts connections without serving
//! anything.

use super::entry::EntryPoint;
use crate::command;
use crate::error::{DockyardError, DockyardResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a worker needs to start serving
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub entry: EntryPoint,
    pub host: String,
    pub port: u16,
    pub app_dir: PathBuf,
    pub site_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

/// A process or task serving on the bound address
#[async_trait]
pub trait Worker: Send {
    /// Take over `listener` and start serving
    async fn start(&mut self, listener: TcpListener, ctx: &WorkerContext) -> DockyardResult<()>;

    /// Resolve when the worker stops on its own
    async fn wait(&mut self) -> DockyardResult<()>;

    /// Stop gracefully, forcing after `timeout`
    async fn stop(&mut self, timeout: Duration) -> DockyardResult<()>;

    /// Human-readable worker name for display
    fn name(&self) -> &'static str;
}

/// Spawns the configured server command
pub struct CommandWorker {
    argv: Vec<String>,
    startup_grace: Duration,
    child: Option<Child>,
}

impl CommandWorker {
    pub fn new(argv: Vec<String>, startup_grace: Duration) -> Self {
        Self {
            argv,
            startup_grace,
            child: None,
        }
    }

    /// Process id of the running child
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    fn display(&self) -> String {
        self.argv.join(" ")
    }
}

#[async_trait]
impl Worker for CommandWorker {
    async fn start(&mut self, listener: TcpListener, ctx: &WorkerContext) -> DockyardResult<()> {
        let port = ctx.port.to_string();
        let app = ctx.app_dir.display().to_string();
        let site = ctx.site_dir.display().to_string();
        let argv = command::substitute(
            &self.argv,
            &[
                ("entry", ctx.entry.locator.as_str()),
                ("host", ctx.host.as_str()),
                ("port", port.as_str()),
                ("app", app.as_str()),
                ("site", site.as_str()),
            ],
        );
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| DockyardError::WorkerStart("service.command is empty".to_string()))?;

        // The worker binds the address itself. Another process can claim it
        // before the child does; that shows up as an early exit below.
        drop(listener);

        debug!("Spawning worker: {}", argv.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .envs(&ctx.env)
            .current_dir(&ctx.app_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DockyardError::WorkerStart(format!("{}: {}", program, e)))?;

        match tokio::time::timeout(self.startup_grace, child.wait()).await {
            Ok(Ok(status)) => {
                let addr = format!("{}:{}", ctx.host, ctx.port);
                if address_taken(&addr).await {
                    warn!("Worker exited and {} is now held by another process", addr);
                    return Err(DockyardError::BindAddressInUse { addr });
                }
                return Err(DockyardError::WorkerStart(format!(
                    "{} exited during startup ({})",
                    self.display(),
                    status
                )));
            }
            Ok(Err(e)) => return Err(DockyardError::command_failed(self.display(), e)),
            Err(_) => {}
        }

        info!("Worker started (pid {})", child.id().unwrap_or_default());
        self.child = Some(child);
        Ok(())
    }

    async fn wait(&mut self) -> DockyardResult<()> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        let status = child
            .wait()
            .await
            .map_err(|e| DockyardError::command_failed(self.display(), e))?;
        self.child = None;

        if status.success() {
            Ok(())
        } else {
            Err(DockyardError::command_exec(
                self.display(),
                format!("worker exited with {}", status),
            ))
        }
    }

    async fn stop(&mut self, timeout: Duration) -> DockyardResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Some(pid) = child.id() {
            debug!("Sending SIGTERM to worker {}", pid);
            terminate(pid);
        }

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Worker exited with {}", status);
                Ok(())
            }
            Ok(Err(e)) => Err(DockyardError::command_failed(self.display(), e)),
            Err(_) => {
                warn!("Worker ignored SIGTERM for {:?}, killing", timeout);
                child
                    .kill()
                    .await
                    .map_err(|e| DockyardError::command_failed(self.display(), e))
            }
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet.
    #[allow(unsafe_code)]
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        debug!(
            "SIGTERM to {} failed: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}

async fn address_taken(addr: &str) -> bool {
    matches!(
        TcpListener::bind(addr).await,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse
    )
}

/// Holds the bound listener and accepts connections without serving them
#[derive(Default)]
pub struct ListenerWorker {
    task: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ListenerWorker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Worker for ListenerWorker {
    async fn start(&mut self, listener: TcpListener, ctx: &WorkerContext) -> DockyardResult<()> {
        let (tx, mut rx) = oneshot::channel();
        let entry = ctx.entry.locator.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            info!("Connection from {} for {}", peer, entry);
                            drop(stream);
                        }
                        Err(e) => warn!("Accept failed: {}", e),
                    },
                }
            }
        });

        self.task = Some(task);
        self.shutdown = Some(tx);
        Ok(())
    }

    async fn wait(&mut self) -> DockyardResult<()> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let result = task.await;
        self.task = None;
        result.map_err(|e| DockyardError::Internal(format!("listener task failed: {}", e)))
    }

    async fn stop(&mut self, timeout: Duration) -> DockyardResult<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                task.abort();
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "listener"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn context(app_dir: PathBuf, port: u16) -> WorkerContext {
        WorkerContext {
            entry: EntryPoint {
                locator: "service:app".to_string(),
                module: "service".to_string(),
                object: "app".to_string(),
                file: app_dir.join("service.py"),
            },
            host: "127.0.0.1".to_string(),
            port,
            app_dir,
            site_dir: PathBuf::from("/site"),
            env: BTreeMap::from([("GREETING".to_string(), "hi".to_string())]),
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn listener_worker_accepts_connections() {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut worker = ListenerWorker::new();
        worker
            .start(listener, &context(dir.path().to_path_buf(), addr.port()))
            .await
            .unwrap();

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();
        // The worker closes each connection after accepting it
        stream.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());

        worker.stop(Duration::from_secs(1)).await.unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_worker_gets_placeholders_and_env() {
        let dir = TempDir::new().unwrap();
        let mut worker = CommandWorker::new(
            sh("echo \"{entry} {port} $GREETING\" > started; exec sleep 30"),
            Duration::from_millis(200),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        worker
            .start(listener, &context(dir.path().to_path_buf(), port))
            .await
            .unwrap();
        assert!(worker.pid().is_some());

        let started = std::fs::read_to_string(dir.path().join("started")).unwrap();
        assert_eq!(started.trim(), format!("service:app {} hi", port));

        worker.stop(Duration::from_secs(5)).await.unwrap();
        assert!(worker.pid().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_worker_exiting_early_fails_to_start() {
        let dir = TempDir::new().unwrap();
        let mut worker = CommandWorker::new(sh("exit 3"), Duration::from_millis(500));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let err = worker
            .start(listener, &context(dir.path().to_path_buf(), 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "WorkerStart");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_worker_losing_the_address_reports_it_in_use() {
        let dir = TempDir::new().unwrap();
        let mut worker = CommandWorker::new(sh("exit 1"), Duration::from_millis(500));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        // Claimed by someone else between the drop and the child's bind
        let _squatter = std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
        let handoff = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let err = worker
            .start(handoff, &context(dir.path().to_path_buf(), port))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "BindAddressInUse");
        assert_eq!(err.exit_code(), 17);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_worker_ignoring_sigterm_is_killed() {
        let dir = TempDir::new().unwrap();
        let mut worker = CommandWorker::new(
            sh("trap '' TERM; while true; do sleep 1; done"),
            Duration::from_millis(200),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        worker
            .start(listener, &context(dir.path().to_path_buf(), 0))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        worker.stop(Duration::from_millis(300)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

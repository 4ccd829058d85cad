//! Service bootstrap
//!
//! Final pipeline stage. Resolves the entry point in the staged
//! application, claims the bind address and hands it to a worker. The
//! address is bound before any worker exists, so an occupied port fails
//! without spawning anything.

pub mod entry;
pub mod worker;

pub use entry::EntryPoint;
pub use worker::{CommandWorker, ListenerWorker, Worker, WorkerContext};

use crate::config::schema::RuntimeConfig;
use crate::config::ServiceConfig;
use crate::error::{DockyardError, DockyardResult};
use crate::runtime::RuntimeEnvironment;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// Starts the service worker for a built image
pub struct Bootstrapper<'a> {
    config: &'a ServiceConfig,
    runtime: &'a RuntimeConfig,
}

impl<'a> Bootstrapper<'a> {
    pub fn new(config: &'a ServiceConfig, runtime: &'a RuntimeConfig) -> Self {
        Self { config, runtime }
    }

    /// Worker for the configured mode
    pub fn default_worker(&self) -> Box<dyn Worker> {
        if self.config.command.is_empty() {
            Box::new(ListenerWorker::new())
        } else {
            Box::new(CommandWorker::new(
                self.config.command.clone(),
                Duration::from_millis(self.config.startup_grace_ms),
            ))
        }
    }

    /// Start the configured worker
    pub async fn start(&self, environment: &RuntimeEnvironment) -> DockyardResult<RunningService> {
        self.start_with(environment, self.default_worker()).await
    }

    /// Start `worker` on the configured address
    pub async fn start_with(
        &self,
        environment: &RuntimeEnvironment,
        mut worker: Box<dyn Worker>,
    ) -> DockyardResult<RunningService> {
        let app_dir = environment
            .app_dir
            .clone()
            .ok_or_else(|| DockyardError::Internal("source has not been staged".to_string()))?;

        let entry =
            entry::resolve(&app_dir, &self.config.entry, &self.config.module_extensions).await?;
        let env = environment.worker_env(self.runtime)?;

        let listener = self.bind().await?;
        let addr = listener
            .local_addr()
            .map_err(|e| DockyardError::io("reading bound address", e))?;

        let ctx = WorkerContext {
            entry,
            host: self.config.host.clone(),
            port: addr.port(),
            app_dir,
            site_dir: environment.site_dir.clone(),
            env,
        };
        worker.start(listener, &ctx).await?;
        info!("Serving {} on {} ({} worker)", ctx.entry.locator, addr, worker.name());

        Ok(RunningService {
            addr,
            entry: ctx.entry,
            worker,
            shutdown_timeout: Duration::from_secs(self.config.shutdown_timeout_secs),
        })
    }

    /// Claim the configured address
    pub async fn bind(&self) -> DockyardResult<TcpListener> {
        let addr = self.config.bind_addr();
        TcpListener::bind(&addr).await.map_err(|e| match e.kind() {
            ErrorKind::AddrInUse => DockyardError::BindAddressInUse { addr: addr.clone() },
            _ => DockyardError::io(format!("binding {}", addr), e),
        })
    }
}

/// Why a running service stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT or SIGTERM
    Signal,
    /// The worker exited on its own
    WorkerExited,
}

/// A service bound to its address with a live worker
pub struct RunningService {
    addr: SocketAddr,
    entry: EntryPoint,
    worker: Box<dyn Worker>,
    shutdown_timeout: Duration,
}

impl RunningService {
    /// Address the service is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn entry(&self) -> &EntryPoint {
        &self.entry
    }

    /// Serve until a shutdown signal arrives or the worker exits, then stop
    /// the worker gracefully
    pub async fn wait_for_shutdown(mut self) -> DockyardResult<StopReason> {
        let reason = tokio::select! {
            signal = shutdown_signal() => {
                signal?;
                info!("Shutdown requested");
                StopReason::Signal
            }
            exited = self.worker.wait() => {
                exited?;
                info!("Worker exited");
                StopReason::WorkerExited
            }
        };
        self.shutdown().await?;
        Ok(reason)
    }

    /// Stop the worker, forcing after the configured timeout
    pub async fn shutdown(mut self) -> DockyardResult<()> {
        self.worker.stop(self.shutdown_timeout).await
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> DockyardResult<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| DockyardError::io("registering SIGTERM handler", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| DockyardError::io("registering SIGINT handler", e))?;
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> DockyardResult<()> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| DockyardError::io("waiting for ctrl-c", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Worker that records whether it was ever started
    struct SpyWorker {
        started: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Worker for SpyWorker {
        async fn start(
            &mut self,
            _listener: TcpListener,
            _ctx: &WorkerContext,
        ) -> DockyardResult<()> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn wait(&mut self) -> DockyardResult<()> {
            Ok(())
        }

        async fn stop(&mut self, _timeout: Duration) -> DockyardResult<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "spy"
        }
    }

    fn staged_app() -> (TempDir, RuntimeEnvironment) {
        let dir = TempDir::new().unwrap();
        let app = dir.path().join("app");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(app.join("service.py"), "app = App()\n").unwrap();
        let env = RuntimeEnvironment {
            root: dir.path().to_path_buf(),
            site_dir: dir.path().join("site"),
            app_dir: Some(app),
            ..Default::default()
        };
        (dir, env)
    }

    fn config(port: u16) -> ServiceConfig {
        ServiceConfig {
            entry: "service:app".to_string(),
            host: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        }
    }

    fn runtime() -> RuntimeConfig {
        RuntimeConfig {
            env_file: None,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn occupied_port_spawns_no_worker() {
        let (_dir, env) = staged_app();
        let occupant = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupant.local_addr().unwrap().port();

        let started = Arc::new(AtomicBool::new(false));
        let worker = Box::new(SpyWorker {
            started: started.clone(),
        });

        let cfg = config(port);
        let rt = runtime();
        let err = Bootstrapper::new(&cfg, &rt)
            .start_with(&env, worker)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, DockyardError::BindAddressInUse { .. }));
        assert_eq!(err.exit_code(), 17);
        assert!(!started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn missing_entry_point_fails_before_binding() {
        let (_dir, env) = staged_app();
        let mut cfg = config(0);
        cfg.entry = "service:missing".to_string();
        let rt = runtime();

        let err = Bootstrapper::new(&cfg, &rt).start(&env).await.err().unwrap();
        assert_eq!(err.kind(), "EntryPointNotFound");
    }

    #[tokio::test]
    async fn unstaged_environment_is_rejected() {
        let cfg = config(0);
        let rt = runtime();
        let env = RuntimeEnvironment {
            site_dir: PathBuf::from("/site"),
            ..Default::default()
        };
        assert!(Bootstrapper::new(&cfg, &rt).start(&env).await.is_err());
    }

    #[tokio::test]
    async fn listener_service_accepts_and_shuts_down() {
        let (_dir, env) = staged_app();
        let cfg = config(0);
        let rt = runtime();

        let service = Bootstrapper::new(&cfg, &rt).start(&env).await.unwrap();
        let addr = service.local_addr();
        assert_eq!(service.entry().object, "app");

        tokio::net::TcpStream::connect(addr).await.unwrap();
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn worker_exit_ends_the_wait() {
        let (_dir, env) = staged_app();
        let cfg = config(0);
        let rt = runtime();
        let worker = Box::new(SpyWorker {
            started: Arc::new(AtomicBool::new(false)),
        });

        let service = Bootstrapper::new(&cfg, &rt).start_with(&env, worker).await.unwrap();
        let reason = service.wait_for_shutdown().await.unwrap();
        assert_eq!(reason, StopReason::WorkerExited);
    }
}

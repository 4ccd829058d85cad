//! Integration tests for Dockyard

use dockyard::lock::{Algorithm, Digest};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A project directory with an artifact index next to it
struct Fixture {
    temp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let fixture = Self {
            temp: TempDir::new().unwrap(),
        };
        std::fs::create_dir_all(fixture.project()).unwrap();
        std::fs::create_dir_all(fixture.index()).unwrap();
        fixture
    }

    fn project(&self) -> PathBuf {
        self.temp.path().join("project")
    }

    fn index(&self) -> PathBuf {
        self.temp.path().join("index")
    }

    fn home(&self) -> PathBuf {
        self.temp.path().join("home")
    }

    /// Publish an artifact under the default `{index}/{name}/{name}-{version}.tar.gz`
    fn publish(&self, name: &str, version: &str, content: &str) {
        let dir = self.index().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{}-{}.tar.gz", name, version)), content).unwrap();
    }

    /// Write `dockyard.lock`; each entry is (name, version, locked content)
    fn write_lock(&self, entries: &[(&str, &str, &str)]) {
        let mut out = String::from("version = 1\n");
        for (name, version, content) in entries {
            out.push_str(&format!(
                "\n[[package]]\nname = \"{}\"\nversion = \"{}\"\ndigest = \"{}\"\n",
                name,
                version,
                Digest::compute(Algorithm::Sha256, content.as_bytes())
            ));
        }
        std::fs::write(self.project().join("dockyard.lock"), out).unwrap();
    }

    fn write_source(&self, rel: &str, content: &str) {
        let path = self.project().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn write_config(&self, port: u16) {
        let content = format!(
            r#"[toolchain]
components = ["sh"]

[dependencies]
index_url = "{}"

[service]
entry = "service:app"
host = "127.0.0.1"
port = {port}

[image]
expose = {port}
"#,
            self.index().display()
        );
        std::fs::write(self.project().join("dockyard.toml"), content).unwrap();
    }

    /// The two-package service used by most scenarios
    fn standard(&self, port: u16) {
        self.publish("pkgA", "1.0.0", "artifact-a");
        self.publish("pkgB", "2.3.1", "artifact-b");
        self.write_lock(&[("pkgA", "1.0.0", "artifact-a"), ("pkgB", "2.3.1", "artifact-b")]);
        self.write_source("service.py", "from pkgA import App\n\napp = App()\n");
        self.write_config(port);
    }
}

/// Find files named `name` anywhere below `dir`
fn find_files(dir: &Path, name: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(find_files(&path, name));
        } else if path.file_name().and_then(|n| n.to_str()) == Some(name) {
            found.push(path);
        }
    }
    found
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

mod cli_tests {
    use super::*;
    use assert_cmd::cargo::cargo_bin_cmd;
    use assert_cmd::Command;
    use predicates::prelude::*;
    use serial_test::serial;
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    /// `dockyard` isolated from the user's config and state
    fn dockyard(fixture: &Fixture) -> Command {
        let home = fixture.home();
        let mut cmd = cargo_bin_cmd!("dockyard");
        cmd.current_dir(fixture.project())
            .env("HOME", &home)
            .env("XDG_CONFIG_HOME", home.join(".config"))
            .env("XDG_STATE_HOME", home.join(".local/state"))
            .env("DOCKYARD_CONFIG", home.join("config.toml"))
            .env("CI", "1")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Same isolation as `dockyard`, for a process the test signals itself
    fn spawn_dockyard(fixture: &Fixture, args: &[&str]) -> std::process::Child {
        let home = fixture.home();
        std::process::Command::new(assert_cmd::cargo::cargo_bin!("dockyard"))
            .args(args)
            .current_dir(fixture.project())
            .env("HOME", &home)
            .env("XDG_CONFIG_HOME", home.join(".config"))
            .env("XDG_STATE_HOME", home.join(".local/state"))
            .env("DOCKYARD_CONFIG", home.join("config.toml"))
            .env("CI", "1")
            .env_remove("RUST_LOG")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap()
    }

    fn wait_for_listener(port: u16, child: &mut std::process::Child) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while std::net::TcpStream::connect(("127.0.0.1", port)).is_err() {
            if let Some(status) = child.try_wait().unwrap() {
                panic!("dockyard run exited early: {status}");
            }
            assert!(Instant::now() < deadline, "service never listened on {port}");
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    #[test]
    fn help_displays() {
        let fixture = Fixture::new();
        dockyard(&fixture)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("build-and-bootstrap"));
    }

    #[test]
    fn version_displays() {
        let fixture = Fixture::new();
        dockyard(&fixture)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("dockyard"));
    }

    #[test]
    fn lock_check_lists_packages() {
        let fixture = Fixture::new();
        fixture.standard(8000);

        dockyard(&fixture)
            .args(["lock", "check", "--format", "plain"])
            .assert()
            .success()
            .stdout(
                predicate::str::contains("pkgA==1.0.0")
                    .and(predicate::str::contains("pkgB==2.3.1")),
            );
    }

    #[test]
    fn lock_check_json_reports_content_hash() {
        let fixture = Fixture::new();
        fixture.standard(8000);

        dockyard(&fixture)
            .args(["lock", "check", "--format", "json"])
            .assert()
            .success()
            .stdout(
                predicate::str::contains("\"content_hash\"")
                    .and(predicate::str::contains("sha256:")),
            );
    }

    #[test]
    fn malformed_lock_exits_10() {
        let fixture = Fixture::new();
        fixture.write_config(8000);
        std::fs::write(
            fixture.project().join("dockyard.lock"),
            "[[package]]\nname = \"pkgA\"\nversion = \"^1.0\"\ndigest = \"sha256:00\"\n",
        )
        .unwrap();

        dockyard(&fixture)
            .args(["lock", "check"])
            .assert()
            .code(10)
            .stderr(predicate::str::contains("Malformed lock file"));
    }

    #[test]
    fn conflicting_duplicate_exits_11() {
        let fixture = Fixture::new();
        fixture.write_config(8000);
        fixture.write_lock(&[("pkgA", "1.0.0", "a"), ("pkgA", "1.1.0", "a")]);

        dockyard(&fixture)
            .args(["lock", "check"])
            .assert()
            .code(11)
            .stderr(predicate::str::contains("pkgA"));
    }

    #[test]
    fn port_mismatch_is_rejected_before_building() {
        let fixture = Fixture::new();
        fixture.standard(8000);
        std::fs::write(
            fixture.project().join("dockyard.toml"),
            "[service]\nport = 9000\n\n[image]\nexpose = 8000\n",
        )
        .unwrap();

        dockyard(&fixture)
            .arg("build")
            .assert()
            .code(2)
            .stderr(predicate::str::contains("image.expose"));
        assert!(!fixture.project().join(".dockyard").exists());
    }

    #[test]
    fn build_then_status_and_cache_list() {
        let fixture = Fixture::new();
        fixture.standard(8000);

        dockyard(&fixture).arg("build").assert().success();

        dockyard(&fixture)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("SourceStaged"));

        dockyard(&fixture)
            .args(["cache", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(
                predicate::str::contains("\"toolchain\"")
                    .and(predicate::str::contains("\"dependencies\""))
                    .and(predicate::str::contains("\"source\"")),
            );

        let packages = find_files(&fixture.project().join(".dockyard"), "PACKAGE.json");
        assert_eq!(packages.len(), 2);
    }

    #[test]
    fn build_with_project_flag() {
        let fixture = Fixture::new();
        fixture.standard(8000);

        dockyard(&fixture)
            .current_dir(fixture.temp.path())
            .args(["build", "--project", "project"])
            .assert()
            .success();
        assert!(fixture.project().join(".dockyard/build.json").exists());
    }

    #[test]
    fn tampered_artifact_exits_13() {
        let fixture = Fixture::new();
        fixture.standard(8000);
        fixture.publish("pkgB", "2.3.1", "tampered");

        dockyard(&fixture)
            .arg("build")
            .assert()
            .code(13)
            .stderr(predicate::str::contains("pkgB"));

        assert!(find_files(&fixture.project().join(".dockyard"), "PACKAGE.json").is_empty());
    }

    #[test]
    fn missing_entry_point_exits_16() {
        let fixture = Fixture::new();
        fixture.standard(free_port());
        std::fs::write(fixture.project().join("service.py"), "handler = None\n").unwrap();

        dockyard(&fixture)
            .arg("run")
            .assert()
            .code(16)
            .stderr(predicate::str::contains("service:app"));
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn run_stops_cleanly_on_sigterm() {
        let fixture = Fixture::new();
        fixture.standard(8000);
        let port = free_port();
        let port_arg = port.to_string();

        let mut child = spawn_dockyard(&fixture, &["run", "--port", &port_arg]);
        wait_for_listener(port, &mut child);
        // Signal handlers are installed once serving begins
        std::thread::sleep(Duration::from_millis(500));

        let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
        assert_eq!(rc, 0);

        let status = child.wait().unwrap();
        assert_eq!(status.code(), Some(0));
        assert!(std::net::TcpStream::connect(("127.0.0.1", port)).is_err());
    }

    #[test]
    fn cache_clear_removes_build_root() {
        let fixture = Fixture::new();
        fixture.standard(8000);

        dockyard(&fixture).arg("build").assert().success();
        dockyard(&fixture).args(["cache", "clear", "--yes"]).assert().success();
        assert!(!fixture.project().join(".dockyard").exists());
    }

    #[test]
    fn init_creates_config_once() {
        let fixture = Fixture::new();

        dockyard(&fixture).arg("init").assert().success();
        assert!(fixture.project().join("dockyard.toml").is_file());

        dockyard(&fixture)
            .arg("init")
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn config_set_local_then_show() {
        let fixture = Fixture::new();
        fixture.standard(8000);

        dockyard(&fixture)
            .args(["config", "set", "runtime.env.LOG_LEVEL", "debug", "--local"])
            .assert()
            .success();

        let content = std::fs::read_to_string(fixture.project().join("dockyard.toml")).unwrap();
        assert!(content.contains("components = [\"sh\"]"));
        assert!(content.contains("LOG_LEVEL"));

        dockyard(&fixture)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("LOG_LEVEL = \"debug\""));
    }

    #[test]
    fn config_set_unknown_key_fails() {
        let fixture = Fixture::new();

        dockyard(&fixture)
            .args(["config", "set", "service.workers", "4"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn config_path_lists_files() {
        let fixture = Fixture::new();
        fixture.write_config(8000);

        dockyard(&fixture)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(
                predicate::str::contains("config.toml")
                    .and(predicate::str::contains("dockyard.toml")),
            );
    }

    #[test]
    fn completions_generate() {
        let fixture = Fixture::new();
        dockyard(&fixture)
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("dockyard"));
    }
}

mod pipeline_tests {
    use super::*;
    use async_trait::async_trait;
    use dockyard::audit::AuditLog;
    use dockyard::config::{Config, ConfigManager};
    use dockyard::error::{DockyardError, DockyardResult};
    use dockyard::fetch::{create_fetcher, ArtifactFetcher};
    use dockyard::lock::LockEntry;
    use dockyard::pipeline::{Pipeline, PipelineState, Stage};
    use dockyard::toolchain::SystemPackages;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;

    /// Host without a package manager
    struct NoPackages;

    #[async_trait]
    impl SystemPackages for NoPackages {
        fn can_install(&self) -> bool {
            false
        }

        async fn refresh(&self) -> DockyardResult<()> {
            Ok(())
        }

        async fn install(&self, _packages: &[String]) -> DockyardResult<()> {
            Err(DockyardError::Internal("no package manager".to_string()))
        }

        async fn clean(&self) -> DockyardResult<()> {
            Ok(())
        }
    }

    /// Wraps the configured fetcher and counts calls
    struct CountingFetcher {
        inner: Arc<dyn ArtifactFetcher>,
        fetches: AtomicUsize,
    }

    impl CountingFetcher {
        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ArtifactFetcher for CountingFetcher {
        async fn fetch(&self, entry: &LockEntry) -> DockyardResult<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(entry).await
        }

        fn backend_name(&self) -> &'static str {
            "counting"
        }
    }

    async fn load_config(fixture: &Fixture) -> Config {
        let local = fixture.project().join("dockyard.toml");
        let mut config = ConfigManager::with_path(fixture.home().join("config.toml"))
            .load_merged(Some(&local))
            .await
            .unwrap();
        config.resolve_paths(&fixture.project());
        config.validate(&local).unwrap();
        config
    }

    async fn pipeline(fixture: &Fixture) -> (Pipeline, Arc<CountingFetcher>) {
        pipeline_with(load_config(fixture).await)
    }

    fn pipeline_with(config: Config) -> (Pipeline, Arc<CountingFetcher>) {
        let fetcher = Arc::new(CountingFetcher {
            inner: create_fetcher(&config.dependencies),
            fetches: AtomicUsize::new(0),
        });
        let pipeline = Pipeline::new(
            config,
            Arc::new(NoPackages),
            fetcher.clone(),
            AuditLog::disabled(),
        );
        (pipeline, fetcher)
    }

    #[tokio::test]
    async fn build_installs_every_locked_package() {
        let fixture = Fixture::new();
        fixture.standard(8000);

        let (mut pipeline, fetcher) = pipeline(&fixture).await;
        let outcome = pipeline.build(false).await.unwrap();

        assert_eq!(outcome.state, PipelineState::SourceStaged);
        assert_eq!(pipeline.state(), PipelineState::SourceStaged);
        assert_eq!(fetcher.fetches(), 2);

        let names: Vec<&str> = outcome
            .environment
            .packages
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["pkgA", "pkgB"]);
        assert_eq!(std::fs::read_dir(&outcome.environment.site_dir).unwrap().count(), 2);

        let app = outcome.environment.app_dir.as_ref().unwrap();
        assert!(app.join("service.py").is_file());
        assert!(app.join("dockyard.lock").is_file());
        assert!(!app.join(".dockyard").exists());
        assert!(outcome.stages.iter().all(|s| !s.cached));
    }

    #[tokio::test]
    async fn unchanged_inputs_reuse_every_layer() {
        let fixture = Fixture::new();
        fixture.standard(8000);

        let (mut first, _) = pipeline(&fixture).await;
        let built = first.build(false).await.unwrap();

        let (mut second, fetcher) = pipeline(&fixture).await;
        let reused = second.build(false).await.unwrap();

        assert_eq!(fetcher.fetches(), 0);
        assert!(reused.stages.iter().all(|s| s.cached));
        for stage in [Stage::Toolchain, Stage::Dependencies, Stage::Source] {
            assert_eq!(
                built.stage(stage).unwrap().layer.fingerprint,
                reused.stage(stage).unwrap().layer.fingerprint
            );
        }
        assert_eq!(reused.environment.packages.len(), 2);
    }

    #[tokio::test]
    async fn source_edit_rebuilds_only_source() {
        let fixture = Fixture::new();
        fixture.standard(8000);

        let (mut first, _) = pipeline(&fixture).await;
        let built = first.build(false).await.unwrap();

        fixture.write_source("service.py", "from pkgA import App\n\napp = App(debug=True)\n");

        let (mut second, fetcher) = pipeline(&fixture).await;
        let rebuilt = second.build(false).await.unwrap();

        assert_eq!(fetcher.fetches(), 0);
        assert!(rebuilt.stage(Stage::Dependencies).unwrap().cached);
        assert!(!rebuilt.stage(Stage::Source).unwrap().cached);
        assert_ne!(
            built.stage(Stage::Source).unwrap().layer.fingerprint,
            rebuilt.stage(Stage::Source).unwrap().layer.fingerprint
        );

        let staged = rebuilt.environment.app_dir.unwrap().join("service.py");
        assert!(std::fs::read_to_string(staged).unwrap().contains("debug=True"));
    }

    #[tokio::test]
    async fn lock_change_rebuilds_dependencies_and_source() {
        let fixture = Fixture::new();
        fixture.standard(8000);

        let (mut first, _) = pipeline(&fixture).await;
        first.build(false).await.unwrap();

        fixture.publish("pkgB", "2.4.0", "artifact-b-next");
        fixture.write_lock(&[
            ("pkgA", "1.0.0", "artifact-a"),
            ("pkgB", "2.4.0", "artifact-b-next"),
        ]);

        let (mut second, fetcher) = pipeline(&fixture).await;
        let rebuilt = second.build(false).await.unwrap();

        assert_eq!(fetcher.fetches(), 2);
        assert!(rebuilt.stage(Stage::Toolchain).unwrap().cached);
        assert!(!rebuilt.stage(Stage::Dependencies).unwrap().cached);
        assert!(!rebuilt.stage(Stage::Source).unwrap().cached);
        assert!(rebuilt.environment.site_dir.join("pkgB-2.4.0").is_dir());
        assert!(!rebuilt.environment.site_dir.join("pkgB-2.3.1").exists());
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_last_good_dependencies() {
        let fixture = Fixture::new();
        fixture.standard(8000);

        let (mut first, _) = pipeline(&fixture).await;
        let built = first.build(false).await.unwrap();

        let mut broken = load_config(&fixture).await;
        broken.dependencies.install_command = vec!["sh".into(), "-c".into(), "exit 1".into()];
        let (mut second, _) = pipeline_with(broken);
        assert!(second.build(false).await.is_err());

        let (mut third, fetcher) = pipeline(&fixture).await;
        let rebuilt = third.build(false).await.unwrap();

        assert_eq!(fetcher.fetches(), 0);
        assert!(rebuilt.stage(Stage::Dependencies).unwrap().cached);
        assert!(rebuilt.stage(Stage::Source).unwrap().cached);
        assert_eq!(
            built.stage(Stage::Dependencies).unwrap().layer.fingerprint,
            rebuilt.stage(Stage::Dependencies).unwrap().layer.fingerprint
        );
        assert_eq!(std::fs::read_dir(&rebuilt.environment.site_dir).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn fresh_build_reuses_nothing() {
        let fixture = Fixture::new();
        fixture.standard(8000);

        let (mut first, _) = pipeline(&fixture).await;
        first.build(false).await.unwrap();

        let (mut second, fetcher) = pipeline(&fixture).await;
        let rebuilt = second.build(true).await.unwrap();

        assert_eq!(fetcher.fetches(), 2);
        assert!(rebuilt.stages.iter().all(|s| !s.cached));
    }

    #[tokio::test]
    async fn digest_mismatch_halts_at_toolchain_ready() {
        let fixture = Fixture::new();
        fixture.standard(8000);
        fixture.publish("pkgB", "2.3.1", "tampered");

        let (mut pipeline, _) = pipeline(&fixture).await;
        let err = pipeline.build(false).await.unwrap_err();

        assert_eq!(pipeline.state(), PipelineState::ToolchainReady);
        assert_eq!(err.kind(), "IntegrityViolation");
        assert_eq!(err.exit_code(), 13);
        match err.root() {
            DockyardError::IntegrityViolation { package, .. } => assert_eq!(package, "pkgB"),
            other => panic!("unexpected error: {other}"),
        }

        let root = fixture.project().join(".dockyard");
        assert!(find_files(&root, "PACKAGE.json").is_empty());
        assert!(find_files(&root, "pkgA-1.0.0.tar.gz").is_empty());
    }

    #[tokio::test]
    async fn missing_component_halts_uninitialized() {
        let fixture = Fixture::new();
        fixture.standard(8000);
        let mut config = load_config(&fixture).await;
        config.toolchain.components = vec!["dockyard-no-such-compiler".to_string()];

        let mut pipeline = Pipeline::new(
            config.clone(),
            Arc::new(NoPackages),
            create_fetcher(&config.dependencies),
            AuditLog::disabled(),
        );
        let err = pipeline.build(false).await.unwrap_err();

        assert_eq!(err.kind(), "ToolchainUnavailable");
        assert_eq!(err.exit_code(), 12);
        assert_eq!(pipeline.state(), PipelineState::Uninitialized);
    }

    #[tokio::test]
    #[serial]
    async fn occupied_port_fails_without_advancing() {
        let fixture = Fixture::new();
        let occupant = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        fixture.standard(occupant.local_addr().unwrap().port());

        let (mut pipeline, _) = pipeline(&fixture).await;
        let outcome = pipeline.build(false).await.unwrap();
        let err = pipeline.serve(&outcome).await.err().unwrap();

        assert_eq!(err.kind(), "BindAddressInUse");
        assert_eq!(err.exit_code(), 17);
        assert_eq!(pipeline.state(), PipelineState::SourceStaged);
    }

    #[tokio::test]
    #[serial]
    async fn two_package_service_accepts_connections() {
        let fixture = Fixture::new();
        fixture.standard(free_port());

        let (mut pipeline, _) = pipeline(&fixture).await;
        let outcome = pipeline.build(false).await.unwrap();
        let service = pipeline.serve(&outcome).await.unwrap();

        assert_eq!(pipeline.state(), PipelineState::ServiceRunning);
        assert_eq!(service.entry().locator, "service:app");
        assert!(service.entry().file.ends_with("service.py"));

        let mut stream = tokio::net::TcpStream::connect(service.local_addr()).await.unwrap();
        stream.write_all(b"ping").await.unwrap();

        service.shutdown().await.unwrap();
    }
}

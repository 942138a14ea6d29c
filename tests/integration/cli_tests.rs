use clap::Parser;
use fileregistry::cli::Cli;
use fileregistry::error::{kind_of, ErrorKind, ExitCode};
use std::fs;
use std::path::Path;
use std::sync::MutexGuard;
use tempfile::{tempdir, TempDir};

struct Fixture {
    _lock: MutexGuard<'static, ()>,
    data: TempDir,
    state: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let lock = crate::ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let state = tempdir().unwrap();
        fs::write(state.path().join("config.toml"), "").unwrap();
        Self {
            _lock: lock,
            data: tempdir().unwrap(),
            state,
        }
    }

    fn config(&self) -> String {
        self.state.path().join("config.toml").display().to_string()
    }

    fn db(&self) -> String {
        self.state.path().join("registry.db").display().to_string()
    }

    fn data(&self) -> &Path {
        self.data.path()
    }

    fn run(&self, args: &[&str]) -> anyhow::Result<(ExitCode, String)> {
        let config = self.config();
        let mut argv = vec!["fileregistry", "--quiet", "--config", config.as_str()];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv)?;
        let mut out = Vec::new();
        let code = fileregistry::execute(cli, &mut out)?;
        Ok((code, String::from_utf8(out)?))
    }

    fn scan_json(&self) -> serde_json::Value {
        let root = self.data().display().to_string();
        let db = self.db();
        let (code, out) = self
            .run(&["scan", &root, "--db", &db, "--json", "--no-progress"])
            .unwrap();
        assert_eq!(code, ExitCode::Success);
        serde_json::from_str(&out).unwrap()
    }
}

#[test]
fn test_scan_then_rescan_json_summary() {
    let fx = Fixture::new();
    fs::write(fx.data().join("a.txt"), "X").unwrap();
    fs::write(fx.data().join("b.txt"), "X").unwrap();
    fs::create_dir(fx.data().join(".git")).unwrap();
    fs::write(fx.data().join(".git").join("config"), "[core]").unwrap();

    let first = fx.scan_json();
    assert_eq!(first["processed"], 2);
    assert_eq!(first["succeeded"], 2);
    assert_eq!(first["storage"], "database");
    assert_eq!(first["algorithm"], "md5");

    let second = fx.scan_json();
    assert_eq!(second["processed"], 2);
    assert_eq!(second["skipped"], 2);
    assert_eq!(second["registry_writes"], 0);
}

#[test]
fn test_dupes_find_and_history() {
    let fx = Fixture::new();
    fs::write(fx.data().join("holiday-1.jpg"), "pixels").unwrap();
    fs::write(fx.data().join("holiday-2.jpg"), "pixels").unwrap();
    fs::write(fx.data().join("notes.txt"), "words").unwrap();
    fx.scan_json();
    let db = fx.db();

    let (code, out) = fx.run(&["dupes", "--db", &db, "--json"]).unwrap();
    assert_eq!(code, ExitCode::Success);
    let groups: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(groups.as_array().unwrap().len(), 1);
    assert_eq!(groups[0]["member_count"], 2);

    let (_, out) = fx.run(&["dupes", "--db", &db]).unwrap();
    assert!(out.contains("(2 copies)"));
    assert!(out.contains("holiday-1.jpg"));

    let (_, out) = fx.run(&["find", "holiday", "--db", &db]).unwrap();
    assert_eq!(out.lines().count(), 2);
    assert!(out.lines().all(|l| l.contains("holiday")));

    let (_, out) = fx.run(&["history", "--db", &db, "--limit", "5"]).unwrap();
    assert_eq!(out.lines().count(), 1);
    assert!(out.contains(&fx.data().canonicalize().unwrap().display().to_string()));
}

#[test]
fn test_prune_and_verify() {
    let fx = Fixture::new();
    let doomed = fx.data().join("doomed.bin");
    fs::write(&doomed, "d").unwrap();
    fs::write(fx.data().join("kept.bin"), "d").unwrap();
    fx.scan_json();
    fs::remove_file(&doomed).unwrap();
    let db = fx.db();

    let (_, out) = fx.run(&["prune", "--db", &db, "--dry-run"]).unwrap();
    assert!(out.contains("doomed.bin"));
    let (_, out) = fx.run(&["find", "doomed", "--db", &db]).unwrap();
    assert_eq!(out.lines().count(), 1);

    fx.run(&["prune", "--db", &db]).unwrap();
    let (_, out) = fx.run(&["find", "doomed", "--db", &db]).unwrap();
    assert!(out.is_empty());

    let (code, out) = fx.run(&["verify", "--db", &db]).unwrap();
    assert_eq!(code, ExitCode::Success);
    assert!(out.is_empty());
}

#[test]
fn test_query_without_registry_is_backend_error() {
    let fx = Fixture::new();
    let db = fx.state.path().join("missing.db").display().to_string();

    let err = fx.run(&["dupes", "--db", &db]).unwrap_err();
    assert_eq!(kind_of(&err), Some(ErrorKind::BackendUnavailable));
    assert_eq!(
        ExitCode::for_kind(kind_of(&err)),
        ExitCode::BackendUnavailable
    );
    assert!(!Path::new(&db).exists());
}

#[test]
fn test_scan_missing_root_is_fatal() {
    let fx = Fixture::new();
    let db = fx.db();
    let root = fx.data().join("nope").display().to_string();

    let err = fx.run(&["scan", &root, "--db", &db]).unwrap_err();
    assert!(err.to_string().contains("not found"));
    assert!(!Path::new(&db).exists());
}

#[test]
fn test_malformed_config_is_fatal_before_scanning() {
    let fx = Fixture::new();
    fs::write(fx.state.path().join("config.toml"), "commit_interval = 0\n").unwrap();
    fs::write(fx.data().join("a"), "a").unwrap();
    let db = fx.db();
    let root = fx.data().display().to_string();

    let err = fx.run(&["scan", &root, "--db", &db]).unwrap_err();
    assert_eq!(kind_of(&err), Some(ErrorKind::ConfigMalformed));
    assert_eq!(ExitCode::for_kind(kind_of(&err)), ExitCode::ConfigError);
    assert!(!Path::new(&db).exists());
}

#[test]
fn test_init_config_writes_and_refuses_overwrite() {
    let fx = Fixture::new();
    let target = fx.state.path().join("fresh").join("config.toml");
    let target_str = target.display().to_string();

    let cli = Cli::try_parse_from(["fileregistry", "--config", &target_str, "init-config"]).unwrap();
    let mut out = Vec::new();
    assert_eq!(
        fileregistry::execute(cli, &mut out).unwrap(),
        ExitCode::Success
    );
    assert!(target.exists());

    let cli = Cli::try_parse_from(["fileregistry", "--config", &target_str, "init-config"]).unwrap();
    let err = fileregistry::execute(cli, &mut Vec::new()).unwrap_err();
    assert!(err.to_string().contains("already exists"));

    let cli = Cli::try_parse_from([
        "fileregistry",
        "--config",
        &target_str,
        "init-config",
        "--force",
    ])
    .unwrap();
    assert!(fileregistry::execute(cli, &mut Vec::new()).is_ok());
}

#[test]
fn test_error_log_option_writes_file() {
    let fx = Fixture::new();
    fs::write(fx.data().join("ok.txt"), "fine").unwrap();
    let log_path = fx.state.path().join("errors.json");
    let root = fx.data().display().to_string();
    let db = fx.db();
    let log_arg = log_path.display().to_string();

    let (code, _) = fx
        .run(&["scan", &root, "--db", &db, "--error-log", &log_arg])
        .unwrap();
    assert_eq!(code, ExitCode::Success);
    let parsed: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&log_path).unwrap()).unwrap();
    assert_eq!(parsed, serde_json::json!([]));
}

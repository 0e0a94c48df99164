//! Loading a runtime from a configuration file

use std::fs;

use component_runtime::{compiler_fn, DefinitionSet, LogLevel, RuntimeEnvironment, RuntimeError};

#[test]
fn test_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runtime.toml");
    fs::write(
        &path,
        "[scheduler]\nnum_workers = 3\n\n[gc]\nttl_ms = 75\n\n[log]\nlevel = \"error\"\n",
    )
    .unwrap();

    let runtime =
        RuntimeEnvironment::from_config_file(&path, compiler_fn(|_| Ok(DefinitionSet::new())))
            .unwrap();
    // Environment overrides apply on top of the file; only assert what the
    // test environment does not set.
    if std::env::var_os("COMPONENT_RUNTIME_WORKERS").is_none() {
        assert_eq!(runtime.config().scheduler.num_workers, 3);
    }
    if std::env::var_os("COMPONENT_RUNTIME_GC_TTL_MS").is_none() {
        assert_eq!(runtime.garbage_collector().config().ttl_ms, 75);
    }
    if std::env::var_os("COMPONENT_RUNTIME_LOG").is_none() {
        assert_eq!(runtime.config().log.level, LogLevel::Error);
    }
}

#[test]
fn test_missing_config_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = RuntimeEnvironment::from_config_file(
        dir.path().join("absent.toml"),
        compiler_fn(|_| Ok(DefinitionSet::new())),
    )
    .unwrap();
    assert_eq!(runtime.config().hot_reload.extension, "cmp");
}

#[test]
fn test_invalid_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runtime.toml");
    fs::write(&path, "[gc\nttl_ms = 1").unwrap();

    let err = RuntimeEnvironment::from_config_file(&path, compiler_fn(|_| Ok(DefinitionSet::new())))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Config(_)));
}

//! End-to-end reload of a real shared library
//!
//! Uses the `hotswap-example-math` cdylib built alongside the tests. When the
//! artifact cannot be found (unusual target layouts) the tests log and return.

use hotswap_config::{RuntimeConfig, WatchBackend, WatchConfig};
use hotswap_core::{library_file_name, Error, ModuleDescriptor};
use hotswap_runtime::{ModuleState, ReloadCoordinator};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

type BinaryFn = extern "C" fn(i32, i32) -> i32;

fn example_library() -> Option<PathBuf> {
    let name = library_file_name("hotswap_example_math");
    let exe = std::env::current_exe().ok()?;
    let deps = exe.parent()?;
    let profile = deps.parent()?;

    [deps.join(&name), profile.join(&name)]
        .into_iter()
        .find(|candidate| candidate.is_file())
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    condition()
}

fn coordinator(dir: &Path) -> ReloadCoordinator {
    ReloadCoordinator::new(RuntimeConfig {
        staging_dir: Some(dir.join("staging")),
        reload_lock_timeout: Duration::from_millis(500),
        watch: WatchConfig {
            backend: WatchBackend::Poll,
            poll_interval: Duration::from_millis(100),
        },
        ..RuntimeConfig::default()
    })
}

fn descriptor(source: &Path) -> ModuleDescriptor {
    ModuleDescriptor::new("math", source)
        .with_symbol("add", "fn(i32, i32) -> i32")
        .with_symbol("multiply", "fn(i32, i32) -> i32")
        .with_symbol("missing_fn", "fn()")
}

fn call(coordinator: &ReloadCoordinator, symbol: &str, a: i32, b: i32) -> i32 {
    unsafe { coordinator.with_symbol("math", symbol, |f: BinaryFn| f(a, b)) }.unwrap()
}

/// Rewrite `source` so its modification time moves forward
fn rebuild(artifact: &Path, source: &Path) {
    // Poll-based watching compares mtimes at second granularity on some filesystems.
    std::thread::sleep(Duration::from_millis(1100));
    std::fs::copy(artifact, source).unwrap();
}

#[test]
fn test_native_scenario() {
    let Some(artifact) = example_library() else {
        eprintln!("example library not built, skipping");
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join(library_file_name("math"));
    std::fs::copy(&artifact, &source).unwrap();

    let coordinator = coordinator(dir.path());
    coordinator.register_or_refresh(descriptor(&source)).unwrap();

    assert_eq!(call(&coordinator, "add", 2, 3), 5);
    assert_eq!(call(&coordinator, "multiply", 6, 7), 42);
    assert!(matches!(
        coordinator.resolve("math", "missing_fn"),
        Err(Error::NotBound { .. })
    ));

    let first = coordinator.module("math").unwrap();
    assert!(first.watched);
    assert_eq!(first.missing_symbols, vec!["missing_fn"]);

    // Rebuild: the watch marks the module dirty and the next poll swaps it.
    rebuild(&artifact, &source);
    assert!(wait_until(Duration::from_secs(10), || {
        coordinator.state("math") == Some(ModuleState::Dirty)
    }));

    let report = coordinator.poll();
    assert_eq!(report.reloaded, vec!["math"]);
    assert_eq!(call(&coordinator, "add", 2, 3), 5);

    let second = coordinator.module("math").unwrap();
    assert_ne!(first.staging_path, second.staging_path);
    assert_eq!(second.reloads, 2);

    // Source removed: refresh fails and nothing stays bound.
    std::fs::remove_file(&source).unwrap();
    let err = coordinator.register_or_refresh(descriptor(&source)).unwrap_err();
    assert!(matches!(err, Error::SourceNotFound { .. }));
    assert!(coordinator.state("math").unwrap().is_failed());
    assert!(matches!(
        coordinator.resolve("math", "add"),
        Err(Error::NotBound { .. })
    ));

    // Restoring the file is picked up by the standby watch.
    std::fs::copy(&artifact, &source).unwrap();
    assert!(wait_until(Duration::from_secs(10), || {
        !coordinator.poll().reloaded.is_empty()
    }));
    assert_eq!(call(&coordinator, "add", 20, 22), 42);

    coordinator.shutdown();
    assert!(coordinator.is_empty());
}

#[test]
fn test_native_load_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join(library_file_name("broken"));
    std::fs::write(&source, b"this is not a shared library").unwrap();

    let coordinator = coordinator(dir.path());
    let err = coordinator
        .register_or_refresh(ModuleDescriptor::new("broken", &source).with_symbol("add", "fn()"))
        .unwrap_err();

    assert!(err.is_load_failure());
    assert!(err.to_string().contains("broken"));
    assert!(matches!(
        coordinator.resolve("broken", "add"),
        Err(Error::NotBound { .. })
    ));

    let info = coordinator.module("broken").unwrap();
    assert!(info.state.is_failed());
    assert_eq!(info.failures, 1);
}

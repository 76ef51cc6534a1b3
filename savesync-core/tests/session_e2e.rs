//! End-to-end session tests.
//!
//! Remotes are backed by local directories through `MockTransfer`; the
//! managed process is `/bin/sh`, so these only run on unix.

#![cfg(unix)]

mod common;

use common::fixtures::{read, write_aged};
use common::{SaveTree, init_test_logging};
use savesync_core::mock::MockTransfer;
use savesync_core::{
    Endpoint, EndpointRegistry, ProcessOutcome, SessionConfig, SessionError, SessionState,
    Strategy, SyncOnExit, SystemLiveness, launch_session,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const HOUR: Duration = Duration::from_secs(3600);

fn sh_config(tree: &SaveTree, registry: EndpointRegistry, script: &str) -> SessionConfig {
    let mut config = SessionConfig::new("/bin/sh", registry);
    config.args = vec!["-c".into(), script.into()];
    config.lock_path = tree.lock_path.clone();
    config.sandbox_parent = tree.sandboxes.clone();
    config.debounce = Duration::from_secs(60);
    config
}

fn local_and_remote(tree: &SaveTree) -> EndpointRegistry {
    EndpointRegistry::new(
        vec![
            Endpoint::local(&tree.local, "local"),
            Endpoint::remote("cloud", "/saves", "cloud:/saves")
                .with_sync_on_exit(SyncOnExit::Enabled),
        ],
        false,
    )
}

#[tokio::test]
async fn test_newer_remote_seeds_sandbox_and_receives_writes() {
    init_test_logging();
    crate::test_log!("TEST START: test_newer_remote_seeds_sandbox_and_receives_writes");

    let tree = SaveTree::new();
    write_aged(&tree.local.join("slot1.dat"), "local", HOUR);
    write_aged(&tree.remote_root.join("saves/slot1.dat"), "remote", Duration::ZERO);
    let transfer = MockTransfer::new().with_remote("cloud", &tree.remote_root);

    // The game sees the remote copy and writes a new save next to it.
    let script = r#"cat "$HOME/game/slot1.dat" > "$HOME/game/seen.txt"; echo new > "$HOME/game/slot2.dat""#;
    let mut config = sh_config(&tree, local_and_remote(&tree), script);
    config.home_dir = Some(PathBuf::from("/home/player"));
    config.data_path = Some(PathBuf::from("/home/player/game"));

    let report = launch_session(
        config,
        Arc::new(transfer),
        &SystemLiveness,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(report.success());
    assert_eq!(report.strategy, Strategy::Sandboxed);
    assert_eq!(report.source.as_deref(), Some("cloud:/saves"));
    assert!(report.sync_failures.is_empty(), "{:?}", report.sync_failures);

    for root in [tree.local.clone(), tree.remote_root.join("saves")] {
        assert_eq!(read(&root.join("seen.txt")), "remote");
        assert_eq!(read(&root.join("slot2.dat")), "new\n");
    }
    assert_eq!(std::fs::read_dir(&tree.sandboxes).unwrap().count(), 0);
    assert!(!tree.lock_path.exists());

    crate::test_log!("TEST PASS: test_newer_remote_seeds_sandbox_and_receives_writes");
}

#[tokio::test]
async fn test_interrupted_swap_restores_real_data() {
    init_test_logging();
    crate::test_log!("TEST START: test_interrupted_swap_restores_real_data");

    let tree = SaveTree::new();
    let real = tree.path("home/.config/game");
    write_aged(&real.join("slot1.dat"), "real", 2 * HOUR);
    write_aged(&tree.local.join("slot1.dat"), "local", HOUR);
    write_aged(&tree.remote_root.join("saves/slot1.dat"), "remote", Duration::ZERO);
    let transfer = MockTransfer::new().with_remote("cloud", &tree.remote_root);

    let mut config = sh_config(&tree, local_and_remote(&tree), "sleep 30");
    config.isolate = false;
    config.data_path = Some(real.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watched = real.join("slot1.dat");
    tokio::spawn(async move {
        // Wait until the swapped-in remote copy is in place.
        for _ in 0..100 {
            if std::fs::read_to_string(&watched).is_ok_and(|c| c == "remote") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(20),
        launch_session(config, Arc::new(transfer), &SystemLiveness, cancel),
    )
    .await
    .expect("session did not stop after cancellation")
    .unwrap();

    assert_eq!(report.strategy, Strategy::Swap);
    assert_eq!(report.outcome, ProcessOutcome::Interrupted);
    assert_eq!(read(&real.join("slot1.dat")), "real");
    assert_eq!(read(&tree.local.join("slot1.dat")), "remote");

    let leftovers: Vec<_> = std::fs::read_dir(real.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .filter(|name| name != "game")
        .collect();
    assert!(leftovers.is_empty(), "unexpected entries: {leftovers:?}");
    assert_eq!(report.states.last().copied(), Some(SessionState::TornDown));

    crate::test_log!("TEST PASS: test_interrupted_swap_restores_real_data");
}

#[tokio::test]
async fn test_watched_endpoint_follows_writes_while_running() {
    init_test_logging();
    crate::test_log!("TEST START: test_watched_endpoint_follows_writes_while_running");

    let tree = SaveTree::new();
    let mirror = tree.path("mirror");
    std::fs::create_dir_all(&mirror).unwrap();
    write_aged(&tree.local.join("slot1.dat"), "local", HOUR);

    let registry = EndpointRegistry::new(
        vec![
            Endpoint::local(&tree.local, "local"),
            Endpoint::local(&mirror, "mirror").with_sync_on_exit(SyncOnExit::Disabled),
        ],
        false,
    );
    // The mirror never syncs on exit, so the marker only appears in the
    // primary if the watcher copied autosave.dat while the game ran.
    let script = format!(
        r#"sleep 1; echo auto > "$HOME/game/autosave.dat"; i=0; while [ $i -lt 50 ]; do if [ -f "{mirror}/autosave.dat" ]; then touch "$HOME/game/mirrored"; break; fi; sleep 0.1; i=$((i+1)); done"#,
        mirror = mirror.display()
    );
    let mut config = sh_config(&tree, registry, &script);
    config.home_dir = Some(PathBuf::from("/home/player"));
    config.data_path = Some(PathBuf::from("/home/player/game"));
    config.debounce = Duration::from_millis(200);

    let report = launch_session(
        config,
        Arc::new(MockTransfer::new()),
        &SystemLiveness,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(report.success());
    assert_eq!(read(&mirror.join("autosave.dat")), "auto\n");
    assert!(tree.local.join("mirrored").exists());
    assert!(tree.local.join("autosave.dat").exists());

    crate::test_log!("TEST PASS: test_watched_endpoint_follows_writes_while_running");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_live_lock_holder_blocks_session() {
    init_test_logging();
    crate::test_log!("TEST START: test_live_lock_holder_blocks_session");

    let tree = SaveTree::new();
    std::fs::write(&tree.lock_path, std::process::id().to_string()).unwrap();
    let registry = EndpointRegistry::new(vec![Endpoint::local(&tree.local, "local")], false);
    let mut config = sh_config(&tree, registry, "touch \"$HOME/game/ran\"");
    config.home_dir = Some(PathBuf::from("/home/player"));
    config.data_path = Some(PathBuf::from("/home/player/game"));

    let err = launch_session(
        config,
        Arc::new(MockTransfer::new()),
        &SystemLiveness,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SessionError::LockContention { pid, .. } if pid == std::process::id()));
    assert!(tree.lock_path.exists());
    assert!(!tree.local.join("ran").exists());

    crate::test_log!("TEST PASS: test_live_lock_holder_blocks_session");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_stale_lock_is_reclaimed() {
    init_test_logging();
    crate::test_log!("TEST START: test_stale_lock_is_reclaimed");

    let tree = SaveTree::new();
    // Above the kernel's pid_max, so never a live process.
    std::fs::write(&tree.lock_path, "4294967").unwrap();
    let registry = EndpointRegistry::new(vec![Endpoint::local(&tree.local, "local")], false);
    let mut config = sh_config(&tree, registry, "touch \"$HOME/game/ran\"");
    config.home_dir = Some(PathBuf::from("/home/player"));
    config.data_path = Some(PathBuf::from("/home/player/game"));

    let report = launch_session(
        config,
        Arc::new(MockTransfer::new()),
        &SystemLiveness,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(report.success());
    assert!(tree.local.join("ran").exists());
    assert!(!tree.lock_path.exists());

    crate::test_log!("TEST PASS: test_stale_lock_is_reclaimed");
}

#[tokio::test]
async fn test_remote_only_registry_syncs_around_real_data() {
    init_test_logging();
    crate::test_log!("TEST START: test_remote_only_registry_syncs_around_real_data");

    let tree = SaveTree::new();
    let real = tree.path("home/.local/share/game");
    write_aged(&real.join("slot1.dat"), "real", HOUR);
    write_aged(&real.join("legacy.dat"), "old", HOUR);
    write_aged(&tree.remote_root.join("saves/slot1.dat"), "remote", Duration::ZERO);
    let transfer = MockTransfer::new().with_remote("cloud", &tree.remote_root);

    let registry = EndpointRegistry::new(
        vec![Endpoint::remote("cloud", "/saves", "cloud:/saves")
            .with_sync_on_exit(SyncOnExit::Enabled)],
        false,
    );
    // Without an install path the game runs inside its data directory.
    let mut config = sh_config(&tree, registry, "cat slot1.dat > seen.txt; echo new > slot2.dat");
    config.data_path = Some(real.clone());

    let report = launch_session(
        config,
        Arc::new(transfer),
        &SystemLiveness,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(report.success());
    assert_eq!(report.strategy, Strategy::PrePostSync);
    assert_eq!(report.source.as_deref(), Some("cloud:/saves"));
    assert_eq!(read(&real.join("slot1.dat")), "remote");
    assert_eq!(read(&real.join("legacy.dat")), "old");

    let remote = tree.remote_root.join("saves");
    assert_eq!(read(&remote.join("seen.txt")), "remote");
    assert_eq!(read(&remote.join("slot2.dat")), "new\n");
    assert!(!tree.lock_path.exists());

    crate::test_log!("TEST PASS: test_remote_only_registry_syncs_around_real_data");
}

#[tokio::test]
async fn test_swap_launch_failure_restores_real_data() {
    init_test_logging();
    crate::test_log!("TEST START: test_swap_launch_failure_restores_real_data");

    let tree = SaveTree::new();
    let real = tree.path("home/.config/game");
    write_aged(&real.join("slot1.dat"), "real", 2 * HOUR);
    write_aged(&tree.local.join("slot1.dat"), "local", HOUR);
    write_aged(&tree.remote_root.join("saves/slot1.dat"), "remote", Duration::ZERO);
    let transfer = MockTransfer::new().with_remote("cloud", &tree.remote_root);

    let mut config = sh_config(&tree, local_and_remote(&tree), "true");
    config.executable = tree.path("bin/missing-game");
    config.isolate = false;
    config.data_path = Some(real.clone());

    let err = launch_session(
        config,
        Arc::new(transfer),
        &SystemLiveness,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SessionError::Launch { .. }), "{err:?}");
    assert_eq!(read(&real.join("slot1.dat")), "real");
    let leftovers: Vec<_> = std::fs::read_dir(real.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .filter(|name| name != "game")
        .collect();
    assert!(leftovers.is_empty(), "unexpected entries: {leftovers:?}");
    assert!(!tree.lock_path.exists());

    crate::test_log!("TEST PASS: test_swap_launch_failure_restores_real_data");
}

//! Process-level plugin lifecycle tests
//!
//! These launch small `/bin/sh` plugins and check that the manager admits,
//! rejects and cleans up after them.

#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use chrono::Utc;
use pulse_control::{ControlConfig, ControlEvent, ErrorKind, PluginState};
use tempfile::tempdir;

use common::*;

#[tokio::test]
async fn responsive_plugin_is_loaded() {
    let dir = tempdir().unwrap();
    let path = responsive_plugin(dir.path(), "cpu");
    let (manager, emitter) = manager(config(dir.path()));
    manager.start();
    let started = Utc::now();

    let record = manager.load(&path).await.unwrap();

    assert_eq!(record.state, PluginState::Loaded);
    assert_eq!(record.name(), "cpu");
    assert_eq!(record.path, path);
    assert!(!record.token.is_empty());
    assert!(record.loaded_time.unwrap() >= started);
    assert!(matches!(
        emitter.history().as_slice(),
        [ControlEvent::PluginLoaded { name, .. }] if name == "cpu"
    ));

    let pid = read_pid(dir.path(), "cpu").unwrap();
    manager.unload("cpu").await.unwrap();
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn silent_plugin_times_out_and_is_killed() {
    let dir = tempdir().unwrap();
    let path = silent_plugin(dir.path(), "silent");
    let (manager, _) = manager(ControlConfig {
        handshake_timeout_ms: 300,
        ..config(dir.path())
    });
    manager.start();
    let started = Instant::now();

    let err = manager.load(&path).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::HandshakeTimeout);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(300) + Duration::from_secs(1));
    assert!(manager.loaded_plugins().await.is_empty());

    let pid = read_pid(dir.path(), "silent").unwrap();
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn rejecting_plugin_reports_its_message() {
    let dir = tempdir().unwrap();
    let path = rejecting_plugin(dir.path(), "bad", "missing credentials");
    let (manager, emitter) = manager(config(dir.path()));
    manager.start();

    let err = manager.load(&path).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::HandshakeRejected);
    assert!(err.to_string().contains("missing credentials"));
    assert!(manager.loaded_plugins().await.is_empty());
    assert!(emitter.history().is_empty());
}

#[tokio::test]
async fn load_before_start_spawns_nothing() {
    let dir = tempdir().unwrap();
    let marker = dir.path().join("ran");
    let path = script(
        dir.path(),
        "marker",
        &format!("touch '{}'\nexec sleep 30", marker.display()),
    );
    let (manager, _) = manager(config(dir.path()));

    let err = manager.load(&path).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);

    let err = manager.load(dir.path().join("missing")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!marker.exists());
}

#[tokio::test]
async fn missing_executable_is_spawn_error() {
    let dir = tempdir().unwrap();
    let (manager, _) = manager(config(dir.path()));
    manager.start();

    let err = manager.load(dir.path().join("missing")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Spawn);
}

#[tokio::test]
async fn plugin_exiting_before_handshake_fails() {
    let dir = tempdir().unwrap();
    let path = script(dir.path(), "crash", "echo 'boom' >&2\nexit 3");
    let (manager, _) = manager(config(dir.path()));
    manager.start();

    let err = manager.load(&path).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandshakeFailed);
    assert!(manager.loaded_plugins().await.is_empty());
}

#[tokio::test]
async fn plugin_receives_launch_argument() {
    let dir = tempdir().unwrap();
    let captured = dir.path().join("arg.json");
    let line = pulse_plugin::Response::success(
        pulse_plugin::PluginMeta::new("argcheck", 1),
        pulse_plugin::PluginType::Processor,
        "tok",
        None,
    )
    .to_line()
    .unwrap();
    let path = script(
        dir.path(),
        "argcheck",
        &format!(
            "printf '%s' \"$1\" > '{}'\nprintf '%s\\n' '{line}'\nexec sleep 30",
            captured.display()
        ),
    );
    let (manager, _) = manager(ControlConfig {
        sign_sessions: true,
        ..config(dir.path())
    });
    manager.start();
    manager.load(&path).await.unwrap();

    let arg = pulse_plugin::Arg::from_json(&std::fs::read_to_string(&captured).unwrap()).unwrap();
    assert!(arg.run_as_daemon);
    assert_eq!(arg.plugin_log_path, dir.path());
    assert_eq!(arg.control_public_key.as_deref(), manager.public_key());

    manager.shutdown().await;
}

#[tokio::test]
async fn subscription_scenario_with_loaded_plugin() {
    let dir = tempdir().unwrap();
    let path = responsive_plugin(dir.path(), "cpu");
    let (manager, emitter) = manager(config(dir.path()));
    manager.start();
    manager.load(&path).await.unwrap();

    assert_eq!(manager.subscribe_metric(&["cpu", "load"]), 1);
    assert_eq!(manager.subscribe_metric(&["cpu", "load"]), 2);
    assert_eq!(manager.unsubscribe_metric(&["cpu", "load"]).unwrap(), 1);
    assert_eq!(manager.unsubscribe_metric(&["cpu", "load"]).unwrap(), 0);
    let err = manager.unsubscribe_metric(&["cpu", "load"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SubscriptionUnderflow);

    let subscription_events: Vec<_> = emitter
        .history()
        .into_iter()
        .filter(|e| e.metric_key().is_some())
        .collect();
    assert_eq!(subscription_events.len(), 4);
    assert!(matches!(
        subscription_events.last(),
        Some(ControlEvent::MetricUnsubscription { count: 0, .. })
    ));

    manager.shutdown().await;
}

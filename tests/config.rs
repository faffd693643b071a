use std::time::Duration;

use fleet_support_inbox::app::AppState;
use tempfile::tempdir;

#[test]
fn missing_file_gives_defaults() {
    let dir = tempdir().unwrap();
    let state = AppState::load_from(&dir.path().join("nope.toml"));

    assert_eq!(state, AppState::default());
    assert_eq!(state.poll_interval(), Duration::from_millis(2000));
    assert_eq!(state.dedup_window(), Duration::from_millis(5000));
    assert!(!state.is_configured());
}

#[test]
fn save_then_load_keeps_settings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("fleet-inbox.toml");
    let state = AppState {
        base_url: "https://fleet.example.com".into(),
        token: Some("tok".into()),
        ws_url: None,
        poll_interval_ms: 3000,
        dedup_window_ms: 4000,
    };

    state.save_to(&path).unwrap();

    assert_eq!(AppState::load_from(&path), state);
}

#[test]
fn partial_file_fills_in_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fleet-inbox.toml");
    std::fs::write(&path, "base_url = \"https://fleet.example.com\"\n").unwrap();

    let state = AppState::load_from(&path);

    assert_eq!(state.base_url, "https://fleet.example.com");
    assert_eq!(state.poll_interval_ms, 2000);
    assert_eq!(state.token, None);
}

#[test]
fn garbage_file_is_ignored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fleet-inbox.toml");
    std::fs::write(&path, "base_url = [not toml").unwrap();

    assert_eq!(AppState::load_from(&path), AppState::default());
}

#[test]
fn overrides_normalize_the_url_and_skip_blanks() {
    let state = AppState::default()
        .with_overrides(Some("fleet.example.com/".into()), Some("  ".into()));

    assert_eq!(state.base_url, "https://fleet.example.com");
    assert_eq!(state.token, None);
}

#[test]
fn push_url_is_derived_unless_given() {
    let mut state = AppState::default().with_overrides(Some("http://localhost:8080".into()), None);
    assert_eq!(state.push_url().unwrap().as_str(), "ws://localhost:8080/ws");

    state.ws_url = Some("wss://push.example.com/socket".into());
    assert_eq!(state.push_url().unwrap().as_str(), "wss://push.example.com/socket");
}

use super::*;

fn store_in(dir: &tempfile::TempDir) -> CredentialStore {
    CredentialStore::new(dir.path().join("nested").join("session.json"))
}

#[test]
fn missing_file_means_logged_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store_in(&dir);
    assert_eq!(store.load().expect("load"), None);
}

#[test]
fn save_then_load_uses_fixed_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store_in(&dir);
    let session = StoredSession::new("tok-1", "alice");
    store.save(&session).expect("save");

    let raw = fs::read_to_string(store.path()).expect("file written");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(value["token"], "tok-1");
    assert_eq!(value["username"], "alice");
    assert!(value.get("userId").is_none());

    assert_eq!(store.load().expect("load"), Some(session));
}

#[test]
fn remember_user_id_is_persisted_under_user_id_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store_in(&dir);
    store
        .save(&StoredSession::new("tok-1", "alice"))
        .expect("save");

    store.remember_user_id(UserId(42)).expect("remember");
    let raw = fs::read_to_string(store.path()).expect("file");
    assert!(raw.contains("\"userId\": 42"));
    assert_eq!(
        store.load().expect("load").and_then(|s| s.user_id),
        Some(UserId(42))
    );
}

#[test]
fn remember_user_id_when_logged_out_is_noop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store_in(&dir);
    store.remember_user_id(UserId(1)).expect("noop");
    assert!(!store.path().exists());
}

#[test]
fn clear_removes_everything_and_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store_in(&dir);
    store
        .save(&StoredSession::new("tok-1", "alice"))
        .expect("save");

    store.clear().expect("clear");
    assert_eq!(store.load().expect("load"), None);
    store.clear().expect("second clear");
}

#[test]
fn blank_credentials_count_as_logged_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store_in(&dir);
    store.save(&StoredSession::new("", "alice")).expect("save");
    assert_eq!(store.load().expect("load"), None);
}

#[test]
fn corrupt_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store_in(&dir);
    fs::create_dir_all(store.path().parent().expect("parent")).expect("dir");
    fs::write(store.path(), "{ not json").expect("write");
    assert!(store.load().is_err());
}

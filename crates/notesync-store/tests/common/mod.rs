//! Shared fixtures for the integration tests: store configuration against a
//! mock server and JSON builders for the wire documents.
#![allow(dead_code)]

use notesync_store::StoreConfig;
use secrecy::SecretString;
use serde_json::{Value, json};

pub fn config(uri: &str) -> StoreConfig {
    StoreConfig {
        url: uri.to_owned(),
        username: "admin".to_owned(),
        password: SecretString::from("hunter2".to_owned()),
        database: "notes".to_owned(),
        passphrase: None,
        obfuscate_passphrase: None,
        use_dynamic_iteration_count: false,
        custom_chunk_size: 0,
        minimum_chunk_size: 20,
        use_v1: false,
    }
}

pub fn note_json(
    id: &str,
    rev: &str,
    path: &str,
    children: &[&str],
    ctime: i64,
    mtime: i64,
    size: u64,
) -> Value {
    json!({
        "_id": id,
        "_rev": rev,
        "type": "plain",
        "path": path,
        "children": children,
        "ctime": ctime,
        "mtime": mtime,
        "size": size,
    })
}

/// An `_all_docs` row carrying a live leaf document.
pub fn leaf_row(id: &str, rev: &str, data: &str) -> Value {
    json!({
        "id": id,
        "key": id,
        "value": {"rev": rev},
        "doc": {"_id": id, "_rev": rev, "type": "leaf", "data": data},
    })
}

/// An `_all_docs` row proving bare existence (no doc body).
pub fn existing_row(id: &str, rev: &str) -> Value {
    json!({"id": id, "key": id, "value": {"rev": rev}})
}

pub fn not_found_row(key: &str) -> Value {
    json!({"key": key, "error": "not_found"})
}

pub fn bulk_ok(ids: &[&str]) -> Value {
    Value::Array(
        ids.iter()
            .map(|id| json!({"ok": true, "id": id, "rev": "1-bulk"}))
            .collect(),
    )
}

pub fn put_ok(id: &str, rev: &str) -> Value {
    json!({"ok": true, "id": id, "rev": rev})
}

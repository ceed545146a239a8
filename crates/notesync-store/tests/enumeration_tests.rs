//! Enumeration integration tests: paged range walks over the metadata id
//! space.

mod common;

use futures::StreamExt;
use notesync_store::NoteStore;
use serde_json::{Value, json};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{config, leaf_row, not_found_row, note_json};

fn note_row(id: &str, children: &[&str]) -> Value {
    json!({
        "id": id,
        "key": id,
        "value": {"rev": "1-r"},
        "doc": note_json(id, "1-r", id, children, 1, 1, 0),
    })
}

#[tokio::test]
async fn enumeration_pages_through_a_range_without_duplicates() {
    let server = MockServer::start().await;
    let store = NoteStore::new(config(&server.uri())).unwrap();

    // a full first page of 100 entries under the first range
    let page1: Vec<Value> = (0..100).map(|i| note_row(&format!("a{i:03}"), &[])).collect();
    Mock::given(method("GET"))
        .and(path("/notes/_all_docs"))
        .and(query_param("startkey", "\"\""))
        .and(query_param("endkey", "\"h:\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": page1})))
        .expect(1)
        .mount(&server)
        .await;
    // the continuation repeats the cursor row, adds one real entry plus a
    // system document that must not surface
    Mock::given(method("GET"))
        .and(path("/notes/_all_docs"))
        .and(query_param("startkey", "\"a099\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": [
            note_row("a099", &[]),
            note_row("a100", &[]),
            {
                "id": "a101",
                "key": "a101",
                "value": {"rev": "1-r"},
                "doc": {"_id": "a101", "_rev": "1-r", "type": "versioninfo", "version": 10},
            },
        ]})))
        .expect(1)
        .mount(&server)
        .await;
    // every other range is empty
    Mock::given(method("GET"))
        .and(path("/notes/_all_docs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": []})))
        .mount(&server)
        .await;

    let entries: Vec<_> = store.enumerate_all_normal_docs(true).collect().await;

    let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids.len(), 101, "100 first-page entries plus the continuation");
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ascending, no duplicates");
    assert_eq!(ids.first().copied(), Some("a000"));
    assert_eq!(ids.last().copied(), Some("a100"));
}

#[tokio::test]
async fn enumeration_skips_entries_that_fail_to_assemble() {
    let server = MockServer::start().await;
    let store = NoteStore::new(config(&server.uri())).unwrap();

    Mock::given(method("GET"))
        .and(path("/notes/_all_docs"))
        .and(query_param("endkey", "\"h:\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": [
            note_row("good.md", &["h:ok"]),
            note_row("torn.md", &["h:gone"]),
        ]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/notes/_all_docs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/notes/_all_docs"))
        .and(body_json(json!({"keys": ["h:ok"]})))
        .respond_with(ResponseTemplate::new(200)
            .set_body_json(json!({"rows": [leaf_row("h:ok", "1-l", "fine")]})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/notes/_all_docs"))
        .and(body_json(json!({"keys": ["h:gone"]})))
        .respond_with(ResponseTemplate::new(200)
            .set_body_json(json!({"rows": [not_found_row("h:gone")]})))
        .mount(&server)
        .await;

    let entries: Vec<_> = store.enumerate_all_normal_docs(false).collect().await;

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id.as_str(), "good.md");
    assert_eq!(entries[0].joined(), "fine");
}

#[tokio::test]
async fn enumeration_queries_all_five_ranges() {
    let server = MockServer::start().await;
    let store = NoteStore::new(config(&server.uri())).unwrap();

    Mock::given(method("GET"))
        .and(path("/notes/_all_docs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": []})))
        .mount(&server)
        .await;

    let entries: Vec<_> = store.enumerate_all_normal_docs(true).collect().await;
    assert!(entries.is_empty());

    let requests = server.received_requests().await.unwrap();
    let mut starts: Vec<String> = requests
        .iter()
        .filter(|r| r.url.path() == "/notes/_all_docs")
        .filter_map(|r| {
            r.url
                .query_pairs()
                .find(|(k, _)| k == "startkey")
                .map(|(_, v)| v.into_owned())
        })
        .collect();
    starts.sort();
    assert_eq!(starts.len(), 5, "one query per range");
}

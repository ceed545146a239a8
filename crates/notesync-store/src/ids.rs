//! Hashing and id derivation.
//!
//! Leaf ids are a pure function of the piece bytes (and the passphrase when
//! one is configured): xxhash64 over `piece-len`, rendered in base-36 and
//! prefixed `h:` (`h:+` for encrypted payloads). Path-to-id mapping is either
//! a canonicalized form of the path or, with an obfuscation passphrase, a
//! salted hash of it.

use xxhash_rust::xxh64::xxh64;

use crate::types::{DocumentId, FilePath, PREFIX_CHUNK, PREFIX_OBFUSCATED};

/// Render a 64-bit hash in base-36.
pub(crate) fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_owned();
    }
    let mut out = [0u8; 13];
    let mut at = out.len();
    while value > 0 {
        at -= 1;
        out[at] = DIGITS[(value % 36) as usize];
        value /= 36;
    }
    String::from_utf8_lossy(&out[at..]).into_owned()
}

/// Base-36 hash of one piece, salted with the passphrase when present.
pub fn piece_hash(piece: &str, passphrase: Option<&str>) -> String {
    let len = piece.len();
    let material = match passphrase {
        Some(pass) => format!("{piece}-{pass}-{len}"),
        None => format!("{piece}-{len}"),
    };
    to_base36(xxh64(material.as_bytes(), 0))
}

/// Content-addressed id of the leaf holding `piece`.
///
/// The `+` marker records that the payload on the wire is encrypted, so ids
/// of encrypted and plain stores never collide.
pub fn leaf_id(piece: &str, passphrase: Option<&str>) -> DocumentId {
    let marker = if passphrase.is_some() { "+" } else { "" };
    DocumentId::new(format!(
        "{PREFIX_CHUNK}{marker}{}",
        piece_hash(piece, passphrase)
    ))
}

/// Derive the metadata document id for a path.
///
/// With an obfuscation passphrase the id is a salted hash of the path
/// (prefix `f:`), so the id never leaks the path in clear. Otherwise the
/// path itself is the id, with a leading `/` escape for paths that would
/// collide with the server's reserved `_`-namespace.
pub fn path_to_id(path: &FilePath, obfuscate_passphrase: Option<&str>) -> DocumentId {
    if let Some(pass) = obfuscate_passphrase {
        return DocumentId::new(format!(
            "{PREFIX_OBFUSCATED}{}",
            piece_hash(path.as_str(), Some(pass))
        ));
    }
    if path.as_str().starts_with('_') {
        DocumentId::new(format!("/{path}"))
    } else {
        DocumentId::new(path.as_str())
    }
}

/// Undo the canonicalization of [`path_to_id`] for non-obfuscated ids.
pub fn id_to_path(id: &DocumentId) -> FilePath {
    match id.as_str().strip_prefix('/') {
        Some(stripped) => FilePath::new(stripped),
        None => FilePath::new(id.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base36_digits() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(36 * 36 + 1), "101");
    }

    #[test]
    fn leaf_ids_are_deterministic() {
        assert_eq!(leaf_id("abcdef", None), leaf_id("abcdef", None));
        assert_eq!(leaf_id("abcdef", Some("p")), leaf_id("abcdef", Some("p")));
    }

    #[test]
    fn passphrase_selects_the_encrypted_id_family() {
        let plain = leaf_id("abcdef", None);
        let sealed = leaf_id("abcdef", Some("p"));
        assert!(plain.as_str().starts_with("h:"));
        assert!(!plain.is_encrypted_chunk());
        assert!(sealed.is_encrypted_chunk());
        assert_ne!(plain, sealed);
    }

    #[test]
    fn piece_length_is_part_of_the_hash() {
        // "ab" + "c" and "a" + "bc" concatenate equally but are distinct pieces
        assert_ne!(piece_hash("ab", None), piece_hash("abc", None));
        assert_ne!(piece_hash("abc", Some("x")), piece_hash("abc", Some("y")));
    }

    #[test]
    fn plain_path_maps_onto_itself() {
        let id = path_to_id(&FilePath::new("notes/a.md"), None);
        assert_eq!(id.as_str(), "notes/a.md");
        assert_eq!(id_to_path(&id), FilePath::new("notes/a.md"));
    }

    #[test]
    fn underscore_paths_are_escaped() {
        let id = path_to_id(&FilePath::new("_templates/a.md"), None);
        assert_eq!(id.as_str(), "/_templates/a.md");
        assert_eq!(id_to_path(&id), FilePath::new("_templates/a.md"));
    }

    #[test]
    fn obfuscated_ids_hide_the_path() {
        let id = path_to_id(&FilePath::new("secret/plan.md"), Some("o"));
        assert!(id.as_str().starts_with("f:"));
        assert!(!id.as_str().contains("secret"));
        // deterministic per (path, passphrase)
        assert_eq!(id, path_to_id(&FilePath::new("secret/plan.md"), Some("o")));
        assert_ne!(id, path_to_id(&FilePath::new("secret/plan.md"), Some("other")));
    }
}

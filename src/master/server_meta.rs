//! The master's own metadata file, currently only the client-id counter.
//!
//! Format is one `key value` pair per line. Unknown keys are rejected so a
//! file written by a newer master is never half-understood.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::error::ServerMetaError;

const CLIENT_ID_KEY: &str = "clientId";
const FIRST_CLIENT_ID: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MetaFields {
    client_id: u64,
}

impl Default for MetaFields {
    fn default() -> Self {
        MetaFields {
            client_id: FIRST_CLIENT_ID,
        }
    }
}

/// Client-id allocator backed by the server meta file.
#[derive(Debug)]
pub struct ServerMeta {
    path: PathBuf,
    fields: Mutex<MetaFields>,
}

impl ServerMeta {
    /// Load the meta file at `path`, or start fresh when it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<ServerMeta, ServerMetaError> {
        let path = path.into();
        let fields = match fs::read_to_string(&path) {
            Ok(text) => {
                let fields = parse(&text)?;
                info!(path = %path.display(), client_id = fields.client_id, "loaded server meta");
                fields
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no server meta, starting fresh");
                MetaFields::default()
            }
            Err(source) => return Err(ServerMetaError::Io { path, source }),
        };
        Ok(ServerMeta {
            path,
            fields: Mutex::new(fields),
        })
    }

    /// Hand out the next client id and persist the advanced counter.
    ///
    /// A failed write is logged and the id is still returned. Fails only once
    /// the id space is used up.
    pub fn next_client_id(&self) -> Result<u64, ServerMetaError> {
        let mut fields = self.fields.lock().unwrap_or_else(PoisonError::into_inner);
        let id = fields.client_id;
        fields.client_id = id.checked_add(1).ok_or(ServerMetaError::ClientIdsExhausted)?;
        match store(&self.path, &fields) {
            Ok(()) => debug!(client_id = id, "allocated client id"),
            Err(err) => warn!(client_id = id, error = %err, "failed to persist server meta"),
        }
        Ok(id)
    }
}

fn parse(text: &str) -> Result<MetaFields, ServerMetaError> {
    let mut fields = MetaFields::default();
    for (n, line) in text.lines().enumerate() {
        let line_no = n + 1;
        let mut parts = line.split_whitespace();
        let Some(key) = parts.next() else {
            continue;
        };
        match key {
            CLIENT_ID_KEY => {
                let value = parts.next().unwrap_or_default();
                fields.client_id = value.parse().map_err(|_| ServerMetaError::BadValue {
                    key: key.to_string(),
                    value: value.to_string(),
                    line: line_no,
                })?;
            }
            _ => {
                return Err(ServerMetaError::UnknownKey {
                    key: key.to_string(),
                    line: line_no,
                });
            }
        }
    }
    Ok(fields)
}

fn store(path: &Path, fields: &MetaFields) -> Result<(), ServerMetaError> {
    let text = format!("{CLIENT_ID_KEY} {}\n", fields.client_id);
    fs::write(path, text).map_err(|source| ServerMetaError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_meta_starts_at_one_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_meta");
        let meta = ServerMeta::open(&path).unwrap();
        assert_eq!(meta.next_client_id().unwrap(), 1);
        assert_eq!(meta.next_client_id().unwrap(), 2);
        assert_eq!(fs::read_to_string(&path).unwrap(), "clientId 3\n");

        let reopened = ServerMeta::open(&path).unwrap();
        assert_eq!(reopened.next_client_id().unwrap(), 3);
    }

    #[test]
    fn exhausted_counter_is_an_error_not_a_wrap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_meta");
        fs::write(&path, format!("clientId {}\n", u64::MAX - 1)).unwrap();
        let meta = ServerMeta::open(&path).unwrap();
        assert_eq!(meta.next_client_id().unwrap(), u64::MAX - 1);
        assert!(matches!(meta.next_client_id(), Err(ServerMetaError::ClientIdsExhausted)));
        assert!(matches!(meta.next_client_id(), Err(ServerMetaError::ClientIdsExhausted)));
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("clientId {}\n", u64::MAX));
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert_eq!(parse("\nclientId 42\n\n").unwrap(), MetaFields { client_id: 42 });
    }

    #[test]
    fn unknown_key_is_fatal() {
        let err = parse("clientId 4\nchunkHandle 9\n").unwrap_err();
        assert!(matches!(
            err,
            ServerMetaError::UnknownKey { ref key, line: 2 } if key == "chunkHandle"
        ));
    }

    #[test]
    fn bad_value_is_fatal() {
        assert!(matches!(parse("clientId four"), Err(ServerMetaError::BadValue { line: 1, .. })));
        assert!(matches!(parse("clientId"), Err(ServerMetaError::BadValue { .. })));
    }

    #[test]
    fn open_surfaces_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_meta");
        fs::write(&path, "bogus 1\n").unwrap();
        assert!(ServerMeta::open(&path).is_err());
    }
}

//! Stable relay client identity
//!
//! The coordinator recognises a returning client by the id it presents on
//! every connection, so the id is persisted on first use.

use std::fs;
use std::path::Path;

use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};

/// `relay-<hostname>-<8 hex chars>`
pub fn generate_client_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| sanitize(&h))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "host".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("relay-{}-{}", host, &suffix[..8])
}

fn sanitize(host: &str) -> String {
    host.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

/// Read the id stored at `path`, creating and persisting one if needed
pub fn load_or_create(path: &Path) -> Result<String> {
    if path.exists() {
        let stored = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let stored = stored.trim();
        if !stored.is_empty() {
            return Ok(stored.to_string());
        }
    }

    let id = generate_client_id();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    fs::write(path, format!("{}\n", id)).map_err(|e| Error::IoWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    info!(client_id = %id, path = %path.display(), "Generated relay client id");
    Ok(id)
}

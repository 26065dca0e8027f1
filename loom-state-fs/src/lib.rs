#![deny(missing_docs)]
//! Filesystem-backed [`SessionStore`] and
//! [`AttachmentPersister`](loom_types::AttachmentPersister)
//! implementations.
//!
//! Each session maps to one `.json` file under the root directory,
//! named by a URL-encoded session id. Writes go through a temp-file,
//! fsync, then atomic-rename sequence so a crash mid-write never
//! leaves a torn file in place — the rename either lands the new
//! contents whole, or the old file is untouched. Attachment payloads
//! land as raw files under `attachments/<session>/`.

use async_trait::async_trait;
use loom_types::attachment::Attachment;
use loom_types::error::SessionError;
use loom_types::id::SessionId;
use loom_types::session::Session;
use loom_types::SessionStore;
use std::path::{Path, PathBuf};

/// Filesystem-backed session store.
///
/// Directory layout:
/// ```text
/// root/
///   <url-encoded-session-id>.json
/// ```
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a new filesystem store rooted at the given directory.
    /// The directory is created lazily on first write.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn path_for(&self, id: &SessionId) -> PathBuf {
        self.root.join(key_to_filename(id.as_str()))
    }

    /// Write `contents` to `path` durably: write to a sibling temp file,
    /// fsync it, rename over the destination, then fsync the directory
    /// so the rename itself is durable.
    async fn write_durably(&self, path: &Path, contents: &str) -> Result<(), SessionError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| SessionError::SaveFailed(e.to_string()))?;

        let tmp_path = path.with_extension("json.tmp");
        let contents = contents.to_string();
        let tmp_path_clone = tmp_path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp_path_clone)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
            Ok(())
        })
        .await
        .map_err(|e| SessionError::SaveFailed(e.to_string()))?
        .map_err(|e| SessionError::SaveFailed(e.to_string()))?;

        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| SessionError::SaveFailed(e.to_string()))?;

        let dir = self.root.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::File::open(&dir)?.sync_all()
        })
        .await
        .map_err(|e| SessionError::SaveFailed(e.to_string()))?
        .map_err(|e| SessionError::SaveFailed(e.to_string()))?;

        Ok(())
    }
}

/// Encode a session id into a safe filename.
fn key_to_filename(key: &str) -> String {
    let mut encoded = String::new();
    for ch in key.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => encoded.push(ch),
            _ => {
                for byte in ch.to_string().as_bytes() {
                    encoded.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    format!("{encoded}.json")
}

/// Decode a filename back to a session id.
fn filename_to_key(filename: &str) -> Option<String> {
    let name = filename.strip_suffix(".json")?;
    let mut result = Vec::new();
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
            let byte = u8::from_str_radix(hex, 16).ok()?;
            result.push(byte);
            i += 3;
        } else {
            result.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(result).ok()
}

#[async_trait]
impl SessionStore for FsStore {
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, SessionError> {
        let path = self.path_for(id);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let session: Session = serde_json::from_str(&contents)
                    .map_err(|e| SessionError::Serialization(e.to_string()))?;
                Ok(Some(session))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SessionError::SaveFailed(e.to_string())),
        }
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        let path = self.path_for(&session.id);
        let contents = serde_json::to_string_pretty(session)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;
        self.write_durably(&path, &contents).await
    }

    async fn create(&self, id: &SessionId, now: i64) -> Result<Session, SessionError> {
        let session = Session::new(id.clone(), now);
        self.save(&session).await?;
        Ok(session)
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<SessionId>, SessionError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(SessionError::SaveFailed(e.to_string())),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SessionError::SaveFailed(e.to_string()))?
        {
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(id_str) = filename_to_key(&filename) else {
                continue;
            };
            let id = SessionId::new(id_str);
            if let Some(session) = self.get(&id).await? {
                sessions.push(session);
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|s| s.id)
            .collect())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), SessionError> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::SaveFailed(e.to_string())),
        }
    }
}

/// Filesystem-backed attachment persister: externalizes inline
/// payloads to `attachments/<session>/<name>` files and rewrites the
/// attachment to a `file://` URI.
///
/// Retention policy: small text/markdown payloads keep their
/// inline data and are returned unchanged; binary or oversized payloads
/// are always written out and their inline `data` cleared. Idempotent —
/// an attachment that already carries an external URI passes through
/// with the URI invariant re-enforced.
pub struct FsAttachmentPersister {
    root: PathBuf,
}

impl FsAttachmentPersister {
    /// Create a persister rooted at the given directory. Session
    /// subdirectories are created lazily on first write.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &SessionId, name: &str) -> PathBuf {
        self.root
            .join(encode_component(session_id.as_str()))
            .join(encode_component(name))
    }
}

/// Encode an id or attachment name into a safe path component.
fn encode_component(key: &str) -> String {
    let encoded = key_to_filename(key);
    encoded.trim_end_matches(".json").to_string()
}

#[async_trait]
impl loom_types::AttachmentPersister for FsAttachmentPersister {
    async fn externalize(
        &self,
        session_id: &SessionId,
        mut attachment: Attachment,
    ) -> Result<Attachment, SessionError> {
        if attachment.has_external_uri() {
            attachment.enforce_uri_invariant();
            return Ok(attachment);
        }
        if attachment.data.is_empty() || attachment.eligible_for_inline_retention() {
            return Ok(attachment);
        }

        let path = self.path_for(session_id, &attachment.name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SessionError::SaveFailed(e.to_string()))?;
        }
        tokio::fs::write(&path, attachment.data.as_bytes())
            .await
            .map_err(|e| SessionError::SaveFailed(e.to_string()))?;

        attachment.uri = format!("file://{}", path.display());
        attachment.enforce_uri_invariant();
        Ok(attachment)
    }

    async fn load(&self, attachment: &Attachment) -> Result<Vec<u8>, SessionError> {
        if !attachment.data.is_empty() {
            return Ok(attachment.data.clone().into_bytes());
        }
        let Some(path) = attachment.uri.strip_prefix("file://") else {
            return Err(SessionError::NotFound(format!(
                "attachment \"{}\" has no loadable uri",
                attachment.name
            )));
        };
        tokio::fs::read(path)
            .await
            .map_err(|e| SessionError::SaveFailed(e.to_string()))
    }
}

//! Credential storage for the access/refresh token pair
//!
//! Persists the current session's tokens to a JSON file with two keys,
//! `access` and `refresh`. All writes use atomic temp-file + rename so a crash
//! never leaves a half-written file. A tokio Mutex serializes writers (login,
//! refresh, logout); readers clone the in-memory copy under the same lock.
//!
//! The file outlives the process: tokens survive restarts until cleared.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// The current session's tokens.
///
/// `refresh` is absent when the auth service issued only an access token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Bearer token attached to API requests
    pub access: String,
    /// Token exchanged at the refresh endpoint for a new access token
    pub refresh: Option<String>,
}

impl Credential {
    pub fn new(access: impl Into<String>, refresh: Option<String>) -> Self {
        Self {
            access: access.into(),
            refresh,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access", &"[REDACTED]")
            .field("refresh", &self.refresh.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// On-disk shape. Both keys are optional so a cleared store is `{}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh: Option<String>,
}

impl CredentialFile {
    fn into_credential(self) -> Option<Credential> {
        self.access.map(|access| Credential {
            access,
            refresh: self.refresh,
        })
    }

    fn from_credential(credential: Option<&Credential>) -> Self {
        match credential {
            Some(c) => Self {
                access: Some(c.access.clone()),
                refresh: c.refresh.clone(),
            },
            None => Self::default(),
        }
    }
}

/// Durable holder of the current credential pair.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<Option<Credential>>,
}

impl CredentialStore {
    /// Load the credential file at `path`.
    ///
    /// A missing file is a cold start (logged out): the store is empty and an
    /// empty `{}` file is written so later loads take the normal path.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let file: CredentialFile = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            let credential = file.into_credential();
            info!(
                path = %path.display(),
                logged_in = credential.is_some(),
                "loaded credentials"
            );
            credential
        } else {
            info!(path = %path.display(), "credential file not found, starting logged out");
            write_atomic(&path, &CredentialFile::default()).await?;
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current credential, if any.
    pub async fn get(&self) -> Option<Credential> {
        self.state.lock().await.clone()
    }

    /// Current access token, if any.
    pub async fn access_token(&self) -> Option<String> {
        self.state.lock().await.as_ref().map(|c| c.access.clone())
    }

    /// Current refresh token, if any.
    pub async fn refresh_token(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .as_ref()
            .and_then(|c| c.refresh.clone())
    }

    /// Replace the stored credential and persist it.
    pub async fn set(&self, credential: Credential) -> Result<()> {
        let mut state = self.state.lock().await;
        write_atomic(&self.path, &CredentialFile::from_credential(Some(&credential))).await?;
        *state = Some(credential);
        debug!("stored credential");
        Ok(())
    }

    /// Store a refreshed access token.
    ///
    /// When `refresh` is `None` the previously stored refresh token is kept.
    /// Returns the credential as persisted.
    pub async fn update_access(&self, access: String, refresh: Option<String>) -> Result<Credential> {
        let mut state = self.state.lock().await;
        let refresh = refresh.or_else(|| state.as_ref().and_then(|c| c.refresh.clone()));
        let credential = Credential { access, refresh };
        write_atomic(&self.path, &CredentialFile::from_credential(Some(&credential))).await?;
        *state = Some(credential.clone());
        debug!(
            refresh_rotated = credential.refresh.is_some(),
            "updated access token"
        );
        Ok(credential)
    }

    /// Forget the stored credential. Clearing an empty store is a no-op write.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = None;
        write_atomic(&self.path, &CredentialFile::default()).await?;
        debug!("cleared credential");
        Ok(())
    }

    /// Whether a credential is stored.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.is_none()
    }
}

/// Write the credential file atomically with 0600 permissions.
///
/// The temp file lives next to the target so the rename never crosses
/// filesystems.
async fn write_atomic(path: &Path, data: &CredentialFile) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        Some(_) => PathBuf::from("."),
        None => return Err(Error::Io("credential path has no parent directory".into())),
    };

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    if let Err(e) = finish_write(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

/// Lock down the temp file and move it over the target.
async fn finish_write(tmp_path: &Path, path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn empty_store(dir: &tempfile::TempDir) -> CredentialStore {
        CredentialStore::load(dir.path().join("credentials.json"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn set_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store
            .set(Credential::new("at_1", Some("rt_1".into())))
            .await
            .unwrap();

        let reloaded = CredentialStore::load(path).await.unwrap();
        let cred = reloaded.get().await.unwrap();
        assert_eq!(cred.access, "at_1");
        assert_eq!(cred.refresh.as_deref(), Some("rt_1"));
    }

    #[tokio::test]
    async fn file_uses_access_and_refresh_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        store
            .set(Credential::new("at_1", Some("rt_1".into())))
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(json["access"], "at_1");
        assert_eq!(json["refresh"], "rt_1");
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        assert!(!path.exists());
        let store = CredentialStore::load(path.clone()).await.unwrap();
        assert!(store.is_empty().await);
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.trim(), "{}");
    }

    #[tokio::test]
    async fn update_access_keeps_refresh_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        store
            .set(Credential::new("at_1", Some("rt_1".into())))
            .await
            .unwrap();

        let updated = store.update_access("at_2".into(), None).await.unwrap();
        assert_eq!(updated.access, "at_2");
        assert_eq!(updated.refresh.as_deref(), Some("rt_1"));
        assert_eq!(store.get().await.unwrap(), updated);
    }

    #[tokio::test]
    async fn update_access_rotates_refresh_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        store
            .set(Credential::new("at_1", Some("rt_1".into())))
            .await
            .unwrap();

        store
            .update_access("at_2".into(), Some("rt_2".into()))
            .await
            .unwrap();
        assert_eq!(store.refresh_token().await.as_deref(), Some("rt_2"));
        assert_eq!(store.access_token().await.as_deref(), Some("at_2"));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        store.set(Credential::new("at_1", None)).await.unwrap();

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.is_empty().await);

        let reloaded = CredentialStore::load(store.path().to_path_buf())
            .await
            .unwrap();
        assert!(reloaded.get().await.is_none());
    }

    #[tokio::test]
    async fn refresh_without_access_loads_as_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(&path, r#"{"refresh":"rt_orphan"}"#)
            .await
            .unwrap();

        let store = CredentialStore::load(path).await.unwrap();
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let result = CredentialStore::load(path).await;
        assert!(matches!(result, Err(Error::CredentialParse(_))));
    }

    #[test]
    fn debug_redacts_tokens() {
        let cred = Credential::new("at_secret", Some("rt_secret".into()));
        let debug = format!("{cred:?}");
        assert!(!debug.contains("at_secret"), "got: {debug}");
        assert!(!debug.contains("rt_secret"), "got: {debug}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        store.set(Credential::new("at_1", None)).await.unwrap();

        let metadata = tokio::fs::metadata(store.path()).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in the target's place makes the rename fail.
        let path = dir.path().join("credentials.json");
        std::fs::create_dir(&path).unwrap();

        let err = write_atomic(&path, &CredentialFile::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got: {err:?}");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name.to_string_lossy().starts_with(".credentials.tmp."))
            .collect();
        assert!(leftovers.is_empty(), "temp files left: {leftovers:?}");
    }
}

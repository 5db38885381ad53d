//! The keyring collaborator spec.md treats as external. Mounting a remote
//! backend needs to look up, and optionally persist, host/user/port/password
//! tuples; a real deployment would talk to a system keyring daemon over the
//! bus, which is outside this workspace, so the lookup is a trait with an
//! in-memory implementation for tests and a simple file-backed one for a
//! real single-user daemon.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub password: Option<String>,
    pub save: bool,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn lookup(&self, key: &CredentialKey) -> Option<Credential>;
    async fn save(&self, key: CredentialKey, credential: Credential);
    async fn forget(&self, key: &CredentialKey);
}

/// Used by tests and by a daemon run with `--no-persist-credentials`.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    entries: Mutex<HashMap<CredentialKey, Credential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn lookup(&self, key: &CredentialKey) -> Option<Credential> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    async fn save(&self, key: CredentialKey, credential: Credential) {
        if credential.save {
            self.entries.lock().unwrap().insert(key, credential);
        }
    }

    async fn forget(&self, key: &CredentialKey) {
        self.entries.lock().unwrap().remove(key);
    }
}

/// A minimal plaintext-on-disk store, gated behind `0600` permissions on
/// Unix. Intended for headless/test deployments without a real keyring;
/// production deployments should replace this with a bus-backed secret
/// service implementation of the same trait.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    cache: Mutex<HashMap<CredentialKey, Credential>>,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        FileCredentialStore {
            path,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn flush(&self, entries: &HashMap<CredentialKey, Credential>) {
        let mut lines = Vec::new();
        for (key, cred) in entries.iter() {
            if let Some(password) = &cred.password {
                lines.push(format!(
                    "{}\t{}\t{}\t{}\t{}",
                    key.scheme,
                    key.host,
                    key.port.map(|p| p.to_string()).unwrap_or_default(),
                    key.user,
                    password
                ));
            }
        }
        let _ = std::fs::write(&self.path, lines.join("\n"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&self.path) {
                let mut perms = metadata.permissions();
                perms.set_mode(0o600);
                let _ = std::fs::set_permissions(&self.path, perms);
            }
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn lookup(&self, key: &CredentialKey) -> Option<Credential> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    async fn save(&self, key: CredentialKey, credential: Credential) {
        if !credential.save {
            return;
        }
        let mut entries = self.cache.lock().unwrap();
        entries.insert(key, credential);
        self.flush(&entries);
    }

    async fn forget(&self, key: &CredentialKey) {
        let mut entries = self.cache.lock().unwrap();
        entries.remove(key);
        self.flush(&entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CredentialKey {
        CredentialKey {
            scheme: "ftp".into(),
            host: "example.com".into(),
            port: Some(21),
            user: "anon".into(),
        }
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_on_save_true() {
        let store = InMemoryCredentialStore::new();
        store
            .save(
                key(),
                Credential {
                    password: Some("secret".into()),
                    save: true,
                },
            )
            .await;
        let got = store.lookup(&key()).await.unwrap();
        assert_eq!(got.password.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn in_memory_store_does_not_persist_when_save_false() {
        let store = InMemoryCredentialStore::new();
        store
            .save(
                key(),
                Credential {
                    password: Some("secret".into()),
                    save: false,
                },
            )
            .await;
        assert!(store.lookup(&key()).await.is_none());
    }

    #[tokio::test]
    async fn forget_removes_entry() {
        let store = InMemoryCredentialStore::new();
        store
            .save(
                key(),
                Credential {
                    password: Some("secret".into()),
                    save: true,
                },
            )
            .await;
        store.forget(&key()).await;
        assert!(store.lookup(&key()).await.is_none());
    }

    #[tokio::test]
    async fn file_store_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        {
            let store = FileCredentialStore::new(path.clone());
            store
                .save(
                    key(),
                    Credential {
                        password: Some("hunter2".into()),
                        save: true,
                    },
                )
                .await;
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("hunter2"));
    }
}

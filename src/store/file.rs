//! JSON-file store.
//!
//! Survives broker restarts. Writes go to a sibling temp file that is then
//! renamed over the record, so a crash never leaves a half-written state.
//! A store built with [`FileStore::open`] also watches the record's directory
//! and reports edits made by other processes as [`AuthStateChange::External`].

use super::{AuthStateChange, AuthStore, StoreResult, CHANGE_CHANNEL_CAPACITY};
use crate::types::AuthState;
use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, Mutex};

pub struct FileStore {
    path: PathBuf,
    /// Serializes writers so a clear cannot interleave with a set
    write_lock: Mutex<()>,
    changes: broadcast::Sender<AuthStateChange>,
    /// Last state written by this store or observed on disk
    last_seen: Arc<StdMutex<Option<AuthState>>>,
    /// Held only to keep the directory watch alive
    _watcher: Option<StdMutex<RecommendedWatcher>>,
}

impl FileStore {
    /// Store that only reports its own writes
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            changes,
            last_seen: Arc::new(StdMutex::new(None)),
            _watcher: None,
        }
    }

    /// Store that also reports changes made to the file by other writers.
    /// Creates the parent directory if needed.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let mut store = Self::new(path);
        let dir = match store.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        if let Ok(mut last_seen) = store.last_seen.lock() {
            *last_seen = read_state(&store.path).ok();
        }

        let path = store.path.clone();
        let last_seen = store.last_seen.clone();
        let changes = store.changes.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            on_disk_event(&path, res, &last_seen, &changes);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %store.path.display(), "Watching auth state file");
        store._watcher = Some(StdMutex::new(watcher));
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn remember(&self, state: Option<AuthState>) {
        if let Ok(mut last_seen) = self.last_seen.lock() {
            *last_seen = state;
        }
    }
}

/// Blocking read used from the watcher thread
fn read_state(path: &Path) -> StoreResult<AuthState> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(AuthState::default()),
        Err(e) => Err(e.into()),
    }
}

fn on_disk_event(
    path: &Path,
    res: notify::Result<Event>,
    last_seen: &StdMutex<Option<AuthState>>,
    changes: &broadcast::Sender<AuthStateChange>,
) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "File watch error");
            return;
        }
    };

    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return;
    }
    if !event.paths.iter().any(|p| p.file_name() == path.file_name()) {
        return;
    }

    let state = match read_state(path) {
        Ok(state) => state,
        Err(e) => {
            // Likely mid-write; the writer's next event triggers another read
            tracing::debug!(path = %path.display(), error = %e, "Auth state file unreadable");
            return;
        }
    };

    let Ok(mut seen) = last_seen.lock() else {
        return;
    };
    if seen.as_ref() == Some(&state) {
        return;
    }
    *seen = Some(state);
    drop(seen);

    tracing::debug!(path = %path.display(), "Auth state changed on disk");
    let _ = changes.send(AuthStateChange::External);
}

#[async_trait]
impl AuthStore for FileStore {
    async fn get_auth_state(&self) -> StoreResult<AuthState> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(AuthState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_auth_state(&self, state: AuthState) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(&state)?;
        {
            let _guard = self.write_lock.lock().await;
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            // Recorded before the rename so the watcher recognises our own write
            self.remember(Some(state));
            let tmp = self.temp_path();
            let written = async {
                tokio::fs::write(&tmp, json).await?;
                tokio::fs::rename(&tmp, &self.path).await
            }
            .await;
            if let Err(e) = written {
                self.remember(None);
                return Err(e.into());
            }
        }

        tracing::debug!(path = %self.path.display(), "Auth state written");
        let _ = self.changes.send(AuthStateChange::Set);
        Ok(())
    }

    async fn clear_auth_state(&self) -> StoreResult<()> {
        {
            let _guard = self.write_lock.lock().await;
            self.remember(Some(AuthState::default()));
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    self.remember(None);
                    return Err(e.into());
                }
            }
        }

        tracing::debug!(path = %self.path.display(), "Auth state cleared");
        let _ = self.changes.send(AuthStateChange::Cleared);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.changes.subscribe()
    }
}

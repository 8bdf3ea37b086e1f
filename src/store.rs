//! Persisted bridge state: the generation counter (spec §4.7, §3 `GenerationCount`).
//!
//! The Python original exposes the state file as an open-ended attribute
//! bag (`AsyncJsonWrapper.__getattr__`/`__setattr__`) backed by a single
//! `asyncio.Lock`. Per spec §9 DESIGN NOTES, that's reimplemented here as a
//! small explicit struct behind a `tokio::sync::Mutex` rather than
//! replicating open-ended attribute access.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

/// On-disk shape of the `currentState` document (spec §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    generation_count: u64,
}

/// Process-wide durable counter of successful prompt submissions.
///
/// `load` reads the file into memory once at startup; every subsequent
/// read is served from memory, and every increment is written back to
/// disk under the mutex before the lock is released. No journalling: a
/// crash between writes loses at most the last few increments, which
/// spec §4.7/Non-goals explicitly accepts.
#[derive(Debug)]
pub struct GenerationState {
    path: PathBuf,
    inner: Mutex<StateDocument>,
}

impl GenerationState {
    /// Load the state document from `path`, creating it with a zeroed
    /// counter if it doesn't exist yet.
    pub async fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "current-state file unreadable; starting from zero");
                StateDocument::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateDocument::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            inner: Mutex::new(doc),
        })
    }

    /// Current generation count.
    pub async fn generation_count(&self) -> u64 {
        self.inner.lock().await.generation_count
    }

    /// Increment the generation count and persist the new value.
    pub async fn increment_generation_count(&self) -> anyhow::Result<u64> {
        let mut guard = self.inner.lock().await;
        guard.generation_count += 1;
        let value = guard.generation_count;
        self.write_locked(&guard).await?;
        Ok(value)
    }

    async fn write_locked(&self, doc: &StateDocument) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn increments_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current_state.json");

        let state = GenerationState::load(&path).await.unwrap();
        assert_eq!(state.generation_count().await, 0);

        assert_eq!(state.increment_generation_count().await.unwrap(), 1);
        assert_eq!(state.increment_generation_count().await.unwrap(), 2);

        let reloaded = GenerationState::load(&path).await.unwrap();
        assert_eq!(reloaded.generation_count().await, 2);
    }

    #[tokio::test]
    async fn concurrent_submissions_land_exactly_k_increments() {
        // P6: the counter read after k successful submissions equals its
        // initial value plus k, even under concurrent submissions.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current_state.json");
        let state = std::sync::Arc::new(GenerationState::load(&path).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let state = std::sync::Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                state.increment_generation_count().await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(state.generation_count().await, 32);
    }
}

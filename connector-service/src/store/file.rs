//! JSON file state store.
//!
//! The whole state lives in one document that is rewritten on every change:
//! written to a sibling temp file, synced, then renamed over the old file.

use super::{DeadLetter, StateStore};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use connector_types::{IdempotencyKey, InstanceId, Watermark};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct FileState {
    #[serde(default)]
    instances: BTreeMap<String, InstanceState>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct InstanceState {
    #[serde(default)]
    watermark: Option<Watermark>,
    #[serde(default)]
    deliveries: BTreeMap<String, Watermark>,
    #[serde(default)]
    dead_letters: BTreeMap<String, DeadLetter>,
    #[serde(default)]
    exhausted: BTreeMap<String, u32>,
    #[serde(default)]
    counters: BTreeMap<String, u64>,
}

/// File-based state store.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileStore {
    /// Open the state file, starting empty if it does not exist.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let state = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileState::default(),
            Err(e) => {
                return Err(StoreError::File {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    async fn persist(&self, state: &FileState) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("tmp");
        let io_err = |source| StoreError::File {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
        file.write_all(&bytes).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }

    /// Apply `change` to the instance state and persist the result.
    ///
    /// The change is made on a copy that replaces the in-memory state only
    /// once it is on disk.
    async fn update<T>(
        &self,
        instance: &InstanceId,
        change: impl FnOnce(&mut InstanceState) -> T,
    ) -> StoreResult<T> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let result = change(
            next.instances
                .entry(instance.as_str().to_string())
                .or_default(),
        );
        self.persist(&next).await?;
        *state = next;
        Ok(result)
    }

    async fn read<T>(&self, instance: &InstanceId, view: impl FnOnce(&InstanceState) -> T) -> T {
        let state = self.state.lock().await;
        match state.instances.get(instance.as_str()) {
            Some(s) => view(s),
            None => view(&InstanceState::default()),
        }
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn load_watermark(&self, instance: &InstanceId) -> StoreResult<Option<Watermark>> {
        Ok(self.read(instance, |s| s.watermark).await)
    }

    async fn save_watermark(
        &self,
        instance: &InstanceId,
        watermark: Watermark,
    ) -> StoreResult<()> {
        self.update(instance, |s| s.watermark = Some(watermark)).await
    }

    async fn record_delivery(
        &self,
        instance: &InstanceId,
        delivery_key: &str,
        watermark: Watermark,
    ) -> StoreResult<()> {
        self.update(instance, |s| {
            s.deliveries
                .entry(delivery_key.to_string())
                .or_insert(watermark);
        })
        .await
    }

    async fn is_delivered(&self, instance: &InstanceId, delivery_key: &str) -> StoreResult<bool> {
        Ok(self
            .read(instance, |s| s.deliveries.contains_key(delivery_key))
            .await)
    }

    async fn prune_deliveries(&self, instance: &InstanceId, up_to: Watermark) -> StoreResult<u64> {
        self.update(instance, |s| {
            let before = s.deliveries.len();
            s.deliveries.retain(|_, w| *w > up_to);
            (before - s.deliveries.len()) as u64
        })
        .await
    }

    async fn record_dead_letter(
        &self,
        instance: &InstanceId,
        letter: &DeadLetter,
    ) -> StoreResult<()> {
        self.update(instance, |s| {
            s.dead_letters
                .insert(letter.idempotency_key.to_string(), letter.clone());
        })
        .await
    }

    async fn dead_letters(
        &self,
        instance: &InstanceId,
        limit: usize,
    ) -> StoreResult<Vec<DeadLetter>> {
        Ok(self
            .read(instance, |s| {
                let mut letters: Vec<DeadLetter> = s.dead_letters.values().cloned().collect();
                letters.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
                letters.truncate(limit);
                letters
            })
            .await)
    }

    async fn increment_exhausted(
        &self,
        instance: &InstanceId,
        key: &IdempotencyKey,
    ) -> StoreResult<u32> {
        self.update(instance, |s| {
            let cycles = s.exhausted.entry(key.to_string()).or_insert(0);
            *cycles += 1;
            *cycles
        })
        .await
    }

    async fn clear_exhausted(&self, instance: &InstanceId, key: &IdempotencyKey) -> StoreResult<()> {
        self.update(instance, |s| {
            s.exhausted.remove(key.as_str());
        })
        .await
    }

    async fn get_counter(&self, instance: &InstanceId, name: &str) -> StoreResult<Option<u64>> {
        Ok(self
            .read(instance, |s| s.counters.get(name).copied())
            .await)
    }

    async fn put_counter(&self, instance: &InstanceId, name: &str, value: u64) -> StoreResult<()> {
        self.update(instance, |s| {
            s.counters.insert(name.to_string(), value);
        })
        .await
    }
}

// src/services/favorites.rs
use crate::errors::StyleError;
use crate::models::FavoriteEntry;
use crate::services::kv_store::KeyValueStore;
use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const FAVORITES_STORAGE_KEY: &str = "stylemorph_favorites";

/// Saved looks, kept as one JSON list under [`FAVORITES_STORAGE_KEY`].
pub struct FavoritesService {
    store: Arc<dyn KeyValueStore>,
    // serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FavoritesService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn list(&self) -> Result<Vec<FavoriteEntry>, StyleError> {
        let Some(raw) = self.store.get(FAVORITES_STORAGE_KEY).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!("Stored favorites are unreadable, treating as empty: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, entries: &[FavoriteEntry]) -> Result<(), StyleError> {
        let raw = serde_json::to_string(entries)?;
        self.store.set(FAVORITES_STORAGE_KEY, &raw).await
    }

    /// Inserts unless an entry with the same id or image already exists.
    /// Returns whether the entry was stored.
    pub async fn add(&self, mut entry: FavoriteEntry) -> Result<bool, StyleError> {
        let _guard = self.write_lock.lock().await;

        if entry.id.trim().is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        entry.saved_at = Utc::now();

        let mut entries = self.list().await?;
        let exists = entries
            .iter()
            .any(|fav| fav.image_ref == entry.image_ref || fav.id == entry.id);
        if exists {
            info!("Favorite already saved, skipping");
            return Ok(false);
        }

        info!("Saving favorite {} ({})", entry.id, entry.category);
        entries.push(entry);
        self.save(&entries).await?;
        Ok(true)
    }

    /// Returns whether an entry with this id was present.
    pub async fn remove(&self, id: &str) -> Result<bool, StyleError> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.list().await?;
        let before = entries.len();
        entries.retain(|fav| fav.id != id);
        self.save(&entries).await?;
        Ok(entries.len() != before)
    }

    pub async fn get(&self, id: &str) -> Result<Option<FavoriteEntry>, StyleError> {
        Ok(self.list().await?.into_iter().find(|fav| fav.id == id))
    }

    pub async fn clear(&self) -> Result<(), StyleError> {
        let _guard = self.write_lock.lock().await;
        self.save(&[]).await
    }
}

//! Process-wide settings with atomic reload.

use std::sync::Arc;

use arc_swap::ArcSwap;
use rota_core::Settings;
use rota_storage::Storage;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;

/// Shared view of the current [`Settings`].
///
/// Readers get a consistent snapshot; `update` persists first and then swaps
/// the snapshot in one step, so nobody observes a half-applied change.
#[derive(Clone)]
pub struct SettingsHandle {
    current: Arc<ArcSwap<Settings>>,
    storage: Arc<dyn Storage>,
    writer: Arc<Mutex<()>>,
}

impl SettingsHandle {
    /// Load settings from storage, falling back to defaults when none are stored.
    pub async fn load(storage: Arc<dyn Storage>) -> Result<Self> {
        let settings = storage.load_settings().await?.unwrap_or_default();
        Ok(Self {
            current: Arc::new(ArcSwap::from_pointee(settings)),
            storage,
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Current snapshot.
    pub fn get(&self) -> Arc<Settings> {
        self.current.load_full()
    }

    /// Apply a change, validate it, persist it and publish it.
    pub async fn update<F>(&self, change: F) -> Result<Arc<Settings>>
    where
        F: FnOnce(&mut Settings) -> std::result::Result<(), rota_core::SettingsError>,
    {
        let _writer = self.writer.lock().await;
        let mut next = Settings::clone(&self.current.load());
        change(&mut next)?;
        next.validate()?;
        self.storage.save_settings(&next).await?;

        let next = Arc::new(next);
        self.current.store(next.clone());
        info!(timezone = %next.timezone, min_on_duty = next.min_on_duty, "settings updated");
        Ok(next)
    }

    /// Re-read settings from storage.
    pub async fn reload(&self) -> Result<Arc<Settings>> {
        let _writer = self.writer.lock().await;
        let settings = Arc::new(self.storage.load_settings().await?.unwrap_or_default());
        self.current.store(settings.clone());
        Ok(settings)
    }
}

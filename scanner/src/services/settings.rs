//! Settings service
//!
//! Typed scanner preferences persisted in the `preferences` table. Every
//! setter writes through immediately and announces the change on a
//! broadcast channel. The last scanned payload is kept here too so an
//! interrupted session can be restored on the next start.

use crate::config::*;
use crate::database::Repository;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::broadcast;

/// Buffered change notifications per subscriber
const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// A persisted scanner setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    AutoSave,
    HistoryRetentionDays,
    SoundEnabled,
    VibrationEnabled,
    CameraFlashEnabled,
    ImageBrightness,
    ImageContrast,
}

impl SettingKey {
    pub const ALL: [SettingKey; 7] = [
        SettingKey::AutoSave,
        SettingKey::HistoryRetentionDays,
        SettingKey::SoundEnabled,
        SettingKey::VibrationEnabled,
        SettingKey::CameraFlashEnabled,
        SettingKey::ImageBrightness,
        SettingKey::ImageContrast,
    ];

    /// Stored key name
    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::AutoSave => KEY_AUTO_SAVE,
            SettingKey::HistoryRetentionDays => KEY_HISTORY_RETENTION_DAYS,
            SettingKey::SoundEnabled => KEY_SOUND_ENABLED,
            SettingKey::VibrationEnabled => KEY_VIBRATION_ENABLED,
            SettingKey::CameraFlashEnabled => KEY_CAMERA_FLASH,
            SettingKey::ImageBrightness => KEY_BRIGHTNESS,
            SettingKey::ImageContrast => KEY_CONTRAST,
        }
    }

    pub fn default_value(self) -> SettingValue {
        match self {
            SettingKey::AutoSave => SettingValue::Bool(DEFAULT_AUTO_SAVE),
            SettingKey::HistoryRetentionDays => SettingValue::Int(DEFAULT_HISTORY_RETENTION_DAYS),
            SettingKey::SoundEnabled => SettingValue::Bool(DEFAULT_SOUND_ENABLED),
            SettingKey::VibrationEnabled => SettingValue::Bool(DEFAULT_VIBRATION_ENABLED),
            SettingKey::CameraFlashEnabled => SettingValue::Bool(DEFAULT_CAMERA_FLASH),
            SettingKey::ImageBrightness => SettingValue::Int(DEFAULT_BRIGHTNESS),
            SettingKey::ImageContrast => SettingValue::Int(DEFAULT_CONTRAST),
        }
    }

    /// Inclusive bounds of a numeric setting
    pub fn range(self) -> Option<(u32, u32)> {
        match self {
            SettingKey::HistoryRetentionDays => {
                Some((MIN_HISTORY_RETENTION_DAYS, MAX_HISTORY_RETENTION_DAYS))
            }
            SettingKey::ImageBrightness => Some((MIN_BRIGHTNESS, MAX_BRIGHTNESS)),
            SettingKey::ImageContrast => Some((MIN_CONTRAST, MAX_CONTRAST)),
            _ => None,
        }
    }

    fn is_bool(self) -> bool {
        matches!(self.default_value(), SettingValue::Bool(_))
    }

    /// Bring a value into this key's type and bounds
    fn normalize(self, value: SettingValue) -> Option<SettingValue> {
        match (self.default_value(), value) {
            (SettingValue::Bool(_), SettingValue::Bool(b)) => Some(SettingValue::Bool(b)),
            (SettingValue::Int(_), SettingValue::Int(n)) => {
                let n = match self.range() {
                    Some((min, max)) => n.clamp(min, max),
                    None => n,
                };
                Some(SettingValue::Int(n))
            }
            _ => None,
        }
    }

    /// Parse a stored string for this key
    fn parse_value(self, raw: &str) -> Option<SettingValue> {
        let raw = raw.trim();
        if self.is_bool() {
            match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "on" | "yes" => Some(SettingValue::Bool(true)),
                "false" | "0" | "off" | "no" => Some(SettingValue::Bool(false)),
                _ => None,
            }
        } else {
            raw.parse::<u32>().ok().map(SettingValue::Int)
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        SettingKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = SettingKey::ALL.iter().map(|k| k.as_str()).collect();
                format!("Unknown setting '{}'. Known settings: {}", s, known.join(", "))
            })
    }
}

/// Value of a setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(u32),
}

impl SettingValue {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(b),
            SettingValue::Int(_) => None,
        }
    }

    pub fn as_int(self) -> Option<u32> {
        match self {
            SettingValue::Int(n) => Some(n),
            SettingValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Int(n) => write!(f, "{}", n),
        }
    }
}

/// Published after a setting has been persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SettingChange {
    pub key: SettingKey,
    pub value: SettingValue,
}

/// Snapshot of every scanner setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub auto_save: bool,
    pub history_retention_days: u32,
    pub sound_enabled: bool,
    pub vibration_enabled: bool,
    pub camera_flash_enabled: bool,
    pub image_brightness: u32,
    pub image_contrast: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_save: DEFAULT_AUTO_SAVE,
            history_retention_days: DEFAULT_HISTORY_RETENTION_DAYS,
            sound_enabled: DEFAULT_SOUND_ENABLED,
            vibration_enabled: DEFAULT_VIBRATION_ENABLED,
            camera_flash_enabled: DEFAULT_CAMERA_FLASH,
            image_brightness: DEFAULT_BRIGHTNESS,
            image_contrast: DEFAULT_CONTRAST,
        }
    }
}

impl Settings {
    /// Value of one setting
    pub fn get(&self, key: SettingKey) -> SettingValue {
        match key {
            SettingKey::AutoSave => SettingValue::Bool(self.auto_save),
            SettingKey::HistoryRetentionDays => SettingValue::Int(self.history_retention_days),
            SettingKey::SoundEnabled => SettingValue::Bool(self.sound_enabled),
            SettingKey::VibrationEnabled => SettingValue::Bool(self.vibration_enabled),
            SettingKey::CameraFlashEnabled => SettingValue::Bool(self.camera_flash_enabled),
            SettingKey::ImageBrightness => SettingValue::Int(self.image_brightness),
            SettingKey::ImageContrast => SettingValue::Int(self.image_contrast),
        }
    }

    fn apply(&mut self, key: SettingKey, value: SettingValue) {
        match (key, value) {
            (SettingKey::AutoSave, SettingValue::Bool(b)) => self.auto_save = b,
            (SettingKey::HistoryRetentionDays, SettingValue::Int(n)) => {
                self.history_retention_days = n
            }
            (SettingKey::SoundEnabled, SettingValue::Bool(b)) => self.sound_enabled = b,
            (SettingKey::VibrationEnabled, SettingValue::Bool(b)) => self.vibration_enabled = b,
            (SettingKey::CameraFlashEnabled, SettingValue::Bool(b)) => {
                self.camera_flash_enabled = b
            }
            (SettingKey::ImageBrightness, SettingValue::Int(n)) => self.image_brightness = n,
            (SettingKey::ImageContrast, SettingValue::Int(n)) => self.image_contrast = n,
            _ => {}
        }
    }
}

/// Service for scanner settings
#[derive(Clone)]
pub struct SettingsStore {
    repo: Repository,
    changes: broadcast::Sender<SettingChange>,
}

impl SettingsStore {
    pub fn new(repo: Repository) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { repo, changes }
    }

    /// Read every setting, falling back to defaults for missing or
    /// unreadable values
    pub async fn load(&self) -> Result<Settings> {
        let stored: HashMap<String, String> = self
            .repo
            .list_preferences()
            .await?
            .into_iter()
            .map(|p| (p.key, p.value))
            .collect();

        let mut settings = Settings::default();
        for key in SettingKey::ALL {
            let value = resolve_stored(key, stored.get(key.as_str()).map(String::as_str));
            settings.apply(key, value);
        }

        Ok(settings)
    }

    /// Read one setting
    pub async fn get(&self, key: SettingKey) -> Result<SettingValue> {
        let raw = self.repo.get_preference(key.as_str()).await?;
        Ok(resolve_stored(key, raw.as_deref()))
    }

    /// Persist one setting and announce it.
    ///
    /// Numeric values are clamped into range; the stored value is returned.
    pub async fn set(&self, key: SettingKey, value: SettingValue) -> Result<SettingValue> {
        let value = key.normalize(value).ok_or_else(|| {
            AppError::Unknown(format!("Setting '{}' does not accept value {}", key, value))
        })?;

        self.repo
            .set_preference(key.as_str(), &value.to_string())
            .await?;

        tracing::info!("Setting updated: {} = {}", key, value);
        self.notify(key, value);

        Ok(value)
    }

    /// Parse and persist a setting given as text
    pub async fn set_from_str(&self, key: &str, value: &str) -> Result<SettingChange> {
        let key = SettingKey::from_str(key).map_err(AppError::Unknown)?;
        let parsed = key.parse_value(value).ok_or_else(|| {
            AppError::Unknown(format!("Invalid value '{}' for setting '{}'", value, key))
        })?;

        let value = self.set(key, parsed).await?;
        Ok(SettingChange { key, value })
    }

    /// Write every default in one transaction, then announce each key
    pub async fn reset_to_defaults(&self) -> Result<Settings> {
        let values: Vec<(&str, String)> = SettingKey::ALL
            .iter()
            .map(|key| (key.as_str(), key.default_value().to_string()))
            .collect();

        self.repo.set_preferences(&values).await?;

        tracing::info!("Settings reset to defaults");
        for key in SettingKey::ALL {
            self.notify(key, key.default_value());
        }

        Ok(Settings::default())
    }

    /// Receive every future setting change
    pub fn subscribe(&self) -> broadcast::Receiver<SettingChange> {
        self.changes.subscribe()
    }

    pub async fn auto_save(&self) -> Result<bool> {
        self.get_bool(SettingKey::AutoSave).await
    }

    pub async fn set_auto_save(&self, enabled: bool) -> Result<()> {
        self.set(SettingKey::AutoSave, SettingValue::Bool(enabled)).await?;
        Ok(())
    }

    pub async fn history_retention_days(&self) -> Result<u32> {
        self.get_int(SettingKey::HistoryRetentionDays).await
    }

    /// Returns the stored (clamped) value
    pub async fn set_history_retention_days(&self, days: u32) -> Result<u32> {
        self.set_int(SettingKey::HistoryRetentionDays, days).await
    }

    pub async fn sound_enabled(&self) -> Result<bool> {
        self.get_bool(SettingKey::SoundEnabled).await
    }

    pub async fn set_sound_enabled(&self, enabled: bool) -> Result<()> {
        self.set(SettingKey::SoundEnabled, SettingValue::Bool(enabled)).await?;
        Ok(())
    }

    pub async fn vibration_enabled(&self) -> Result<bool> {
        self.get_bool(SettingKey::VibrationEnabled).await
    }

    pub async fn set_vibration_enabled(&self, enabled: bool) -> Result<()> {
        self.set(SettingKey::VibrationEnabled, SettingValue::Bool(enabled))
            .await?;
        Ok(())
    }

    pub async fn camera_flash_enabled(&self) -> Result<bool> {
        self.get_bool(SettingKey::CameraFlashEnabled).await
    }

    pub async fn set_camera_flash_enabled(&self, enabled: bool) -> Result<()> {
        self.set(SettingKey::CameraFlashEnabled, SettingValue::Bool(enabled))
            .await?;
        Ok(())
    }

    pub async fn image_brightness(&self) -> Result<u32> {
        self.get_int(SettingKey::ImageBrightness).await
    }

    pub async fn set_image_brightness(&self, brightness: u32) -> Result<u32> {
        self.set_int(SettingKey::ImageBrightness, brightness).await
    }

    pub async fn image_contrast(&self) -> Result<u32> {
        self.get_int(SettingKey::ImageContrast).await
    }

    pub async fn set_image_contrast(&self, contrast: u32) -> Result<u32> {
        self.set_int(SettingKey::ImageContrast, contrast).await
    }

    /// Payload and format name of a scan that was not cleared by a reset or
    /// a clean shutdown
    pub async fn last_scan(&self) -> Result<Option<(String, String)>> {
        let payload = self.repo.get_preference(KEY_LAST_BARCODE).await?;
        let format = self.repo.get_preference(KEY_LAST_FORMAT).await?;

        match (payload, format) {
            (Some(payload), Some(format)) if !payload.is_empty() && !format.is_empty() => {
                Ok(Some((payload, format)))
            }
            _ => Ok(None),
        }
    }

    pub async fn remember_last_scan(&self, payload: &str, format_name: &str) -> Result<()> {
        self.repo
            .set_preferences(&[
                (KEY_LAST_BARCODE, payload.to_string()),
                (KEY_LAST_FORMAT, format_name.to_string()),
            ])
            .await
    }

    pub async fn clear_last_scan(&self) -> Result<()> {
        self.repo
            .set_preferences(&[
                (KEY_LAST_BARCODE, String::new()),
                (KEY_LAST_FORMAT, String::new()),
            ])
            .await
    }

    async fn get_bool(&self, key: SettingKey) -> Result<bool> {
        let value = self.get(key).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn get_int(&self, key: SettingKey) -> Result<u32> {
        let value = self.get(key).await?;
        Ok(value.as_int().unwrap_or(0))
    }

    async fn set_int(&self, key: SettingKey, value: u32) -> Result<u32> {
        let stored = self.set(key, SettingValue::Int(value)).await?;
        Ok(stored.as_int().unwrap_or(value))
    }

    fn notify(&self, key: SettingKey, value: SettingValue) {
        // No subscribers is not an error
        let _ = self.changes.send(SettingChange { key, value });
    }
}

/// Interpret a stored value, clamping it or falling back to the default
fn resolve_stored(key: SettingKey, raw: Option<&str>) -> SettingValue {
    let Some(raw) = raw else {
        return key.default_value();
    };

    match key.parse_value(raw).and_then(|v| key.normalize(v)) {
        Some(value) => value,
        None => {
            tracing::warn!(
                "Unreadable value '{}' for setting '{}', using default",
                raw,
                key
            );
            key.default_value()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::create_memory_pool;
    use tempfile::TempDir;

    async fn create_test_store() -> SettingsStore {
        SettingsStore::new(Repository::new(create_memory_pool().await.unwrap()))
    }

    #[tokio::test]
    async fn test_defaults_when_empty() {
        let store = create_test_store().await;

        assert_eq!(store.load().await.unwrap(), Settings::default());
        assert!(store.auto_save().await.unwrap());
        assert_eq!(store.history_retention_days().await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_reset_restores_documented_defaults() {
        let store = create_test_store().await;

        store.set_auto_save(false).await.unwrap();
        store.set_history_retention_days(7).await.unwrap();
        store.set_sound_enabled(false).await.unwrap();
        store.set_vibration_enabled(true).await.unwrap();
        store.set_camera_flash_enabled(true).await.unwrap();
        store.set_image_brightness(10).await.unwrap();
        store.set_image_contrast(60).await.unwrap();

        store.reset_to_defaults().await.unwrap();

        assert!(store.auto_save().await.unwrap());
        assert_eq!(store.history_retention_days().await.unwrap(), 30);
        assert!(store.sound_enabled().await.unwrap());
        assert!(!store.vibration_enabled().await.unwrap());
        assert!(!store.camera_flash_enabled().await.unwrap());
        assert_eq!(store.image_brightness().await.unwrap(), 80);
        assert_eq!(store.image_contrast().await.unwrap(), 140);
    }

    #[tokio::test]
    async fn test_setters_clamp() {
        let store = create_test_store().await;

        assert_eq!(store.set_history_retention_days(0).await.unwrap(), 1);
        assert_eq!(store.set_history_retention_days(1000).await.unwrap(), 365);
        assert_eq!(store.set_image_brightness(500).await.unwrap(), 150);
        assert_eq!(store.set_image_contrast(10).await.unwrap(), 50);
        assert_eq!(store.image_contrast().await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_unreadable_values_fall_back() {
        let store = create_test_store().await;

        store
            .repo
            .set_preference(KEY_HISTORY_RETENTION_DAYS, "forever")
            .await
            .unwrap();
        store.repo.set_preference(KEY_CONTRAST, "900").await.unwrap();

        let settings = store.load().await.unwrap();
        assert_eq!(settings.history_retention_days, 30);
        assert_eq!(settings.image_contrast, 200);
    }

    #[tokio::test]
    async fn test_settings_persist_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("settings.db");

        {
            let pool = crate::database::create_pool(&db_path).await.unwrap();
            let store = SettingsStore::new(Repository::new(pool.clone()));
            store.set_image_brightness(25).await.unwrap();
            store.set_sound_enabled(false).await.unwrap();
            pool.close().await;
        }

        let pool = crate::database::create_pool(&db_path).await.unwrap();
        let store = SettingsStore::new(Repository::new(pool));
        let settings = store.load().await.unwrap();
        assert_eq!(settings.image_brightness, 25);
        assert!(!settings.sound_enabled);
    }

    #[tokio::test]
    async fn test_changes_are_announced() {
        let store = create_test_store().await;
        let mut changes = store.subscribe();

        store.set_camera_flash_enabled(true).await.unwrap();

        let change = changes.recv().await.unwrap();
        assert_eq!(change.key, SettingKey::CameraFlashEnabled);
        assert_eq!(change.value, SettingValue::Bool(true));
    }

    #[tokio::test]
    async fn test_set_from_str() {
        let store = create_test_store().await;

        let change = store.set_from_str("image_contrast", "120").await.unwrap();
        assert_eq!(change.value, SettingValue::Int(120));

        let change = store.set_from_str("sound_enabled", "off").await.unwrap();
        assert_eq!(change.value, SettingValue::Bool(false));

        assert!(store.set_from_str("no_such_key", "1").await.is_err());
        assert!(store.set_from_str("auto_save_barcodes", "maybe").await.is_err());
    }

    #[tokio::test]
    async fn test_last_scan_round() {
        let store = create_test_store().await;

        assert_eq!(store.last_scan().await.unwrap(), None);

        store.remember_last_scan("12345", "EAN13").await.unwrap();
        assert_eq!(
            store.last_scan().await.unwrap(),
            Some(("12345".to_string(), "EAN13".to_string()))
        );

        store.clear_last_scan().await.unwrap();
        assert_eq!(store.last_scan().await.unwrap(), None);
    }
}

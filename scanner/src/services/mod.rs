//! Services module
//!
//! Business logic services that coordinate between the session and the repository.

pub mod history;
pub mod scheduler;
pub mod settings;

pub use history::HistoryStore;
pub use scheduler::HistoryCleanupScheduler;
pub use settings::{SettingChange, SettingKey, SettingValue, Settings, SettingsStore};

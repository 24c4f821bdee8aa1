//! Application configuration constants
//!
//! Central location for all configuration constants, storage names,
//! setting keys and validation boundaries used throughout the pipeline.

// ===== Storage Locations =====

/// Database file name inside the app data directory
pub const DATABASE_FILE_NAME: &str = "barscan.db";

/// Directory (inside the app data directory) holding scan images
pub const IMAGE_DIRECTORY: &str = "barcode_images";

/// Prefix of every scan image file name
pub const IMAGE_FILE_PREFIX: &str = "barcode_";

/// Extension of every scan image file name
pub const IMAGE_FILE_EXTENSION: &str = "jpg";

/// JPEG quality used when writing scan images.
/// High enough to keep the enhanced brightness without visible blocking.
pub const IMAGE_JPEG_QUALITY: u8 = 95;

/// Date format stored in the history `date` column (dd-mm-YYYY)
pub const HISTORY_DATE_FORMAT: &str = "%d-%m-%Y";

// ===== Bounding Box Overlay =====

/// Colour of the bounding box drawn around a decoded barcode (RGBA)
pub const BOUNDING_BOX_COLOR: [u8; 4] = [0, 255, 0, 255];

/// Stroke width of the bounding box in pixels
pub const BOUNDING_BOX_STROKE_WIDTH: u32 = 8;

// ===== Setting Keys =====

pub const KEY_AUTO_SAVE: &str = "auto_save_barcodes";
pub const KEY_HISTORY_RETENTION_DAYS: &str = "history_retention_days";
pub const KEY_SOUND_ENABLED: &str = "sound_enabled";
pub const KEY_VIBRATION_ENABLED: &str = "vibration_enabled";
pub const KEY_CAMERA_FLASH: &str = "camera_flash_enabled";
pub const KEY_BRIGHTNESS: &str = "image_brightness";
pub const KEY_CONTRAST: &str = "image_contrast";

/// Last scanned payload, kept across restarts until a clean shutdown
pub const KEY_LAST_BARCODE: &str = "BARCODE";
/// Format name of the last scanned payload
pub const KEY_LAST_FORMAT: &str = "FORMAT";

// ===== Setting Defaults =====

pub const DEFAULT_AUTO_SAVE: bool = true;
pub const DEFAULT_HISTORY_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_SOUND_ENABLED: bool = true;
pub const DEFAULT_VIBRATION_ENABLED: bool = false;
pub const DEFAULT_CAMERA_FLASH: bool = false;
pub const DEFAULT_BRIGHTNESS: u32 = 80;
pub const DEFAULT_CONTRAST: u32 = 140;

// ===== Setting Limits =====

/// Minimum history retention in days (at least 1 day)
pub const MIN_HISTORY_RETENTION_DAYS: u32 = 1;

/// Maximum history retention in days (1 year)
pub const MAX_HISTORY_RETENTION_DAYS: u32 = 365;

/// Brightness offset added to each channel after contrast scaling
pub const MIN_BRIGHTNESS: u32 = 0;
pub const MAX_BRIGHTNESS: u32 = 150;

/// Contrast in percent (50 = 0.5x, 200 = 2.0x)
pub const MIN_CONTRAST: u32 = 50;
pub const MAX_CONTRAST: u32 = 200;

// ===== Scheduling =====

/// Cron expression for the retention purge (daily at 03:00)
pub const HISTORY_CLEANUP_CRON: &str = "0 0 3 * * *";

/// Seconds per day used for retention arithmetic
pub const SECONDS_PER_DAY: i64 = 86_400;

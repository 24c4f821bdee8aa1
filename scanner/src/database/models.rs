//! Database models
//!
//! Rust structs representing database entities.
//! Column names follow the stored `history` schema (camelCase), field names
//! follow Rust conventions.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One past scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct HistoryEntry {
    pub id: i64,
    /// Calendar day of the scan (dd-mm-YYYY)
    pub date: String,
    /// Unix timestamp of the scan in seconds
    pub time: i64,
    /// Decoder format code
    #[sqlx(rename = "codeType")]
    pub code_type: i32,
    /// Decoded payload
    #[sqlx(rename = "codeValue")]
    pub code_value: String,
    pub note: Option<String>,
    /// JPEG written for this scan, if any
    #[sqlx(rename = "imagePath")]
    pub image_path: Option<String>,
}

/// Insert history request
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub date: String,
    pub time: i64,
    pub code_type: i32,
    pub code_value: String,
    pub image_path: Option<String>,
}

/// Stored preference
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Preference {
    pub key: String,
    pub value: String,
}

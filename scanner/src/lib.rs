//! barscan library
//!
//! Barcode scanning core: frame analysis, scan image processing, image
//! storage, scan history, settings and the scan session controller.

pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod services;
pub mod session;
pub mod storage;
pub mod vision;

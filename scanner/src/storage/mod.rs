//! Storage module
//!
//! Provides file storage for processed scan images.

pub mod image_store;

pub use image_store::ImageStorage;

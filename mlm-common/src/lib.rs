//! # MLM Common Library
//!
//! Shared code for the model-lifecycle services including:
//! - Common error type
//! - Event types (ModelEvent enum) and the EventBus
//! - Bootstrap configuration loading and root folder resolution
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};

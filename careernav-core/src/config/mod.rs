//! Configuration module for CareerNavigator.
//!
//! Manages client settings stored in SQLite.

mod settings;

pub use settings::{ClientSettings, API_URL_ENV, DEFAULT_API_URL};

//! This module aggregates various utility submodules used throughout the application.

/// SQLite persistence for settings and statistics.
pub mod database;
/// Localized message catalogue.
pub mod locale;
/// Cached guild and user settings.
pub mod settings;
/// Buffered play statistics.
pub mod statistics;
/// Expiring concurrent map.
pub mod ttl_cache;

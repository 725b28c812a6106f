pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod identity;
pub mod import;
pub mod ingest;

/// Application name for XDG paths
pub const APP_NAME: &str = "spinlog";

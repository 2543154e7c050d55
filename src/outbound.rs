pub mod cache;
pub mod db;
pub mod dkim;
pub mod ip_lookup;
pub mod maildir;
pub mod signing_config;
pub mod system;
pub mod telemetry;

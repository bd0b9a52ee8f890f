// querydock: SQL client backend.
//
// `db` holds the plugin contract and the connection orchestrator, `storage`
// persists logical connections, and `api` exposes both over HTTP.

pub mod api;
pub mod config;
pub mod db;
pub mod storage;

pub use config::{AppConfig, PoolSettings};
pub use db::{ConnectionManager, PluginRegistry};

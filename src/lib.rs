pub mod config;
pub mod detect;
pub mod upload;
pub mod watcher;

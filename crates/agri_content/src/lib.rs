pub mod config;
pub mod content;
pub mod fixtures;
pub mod generator;
pub mod history;
pub mod library;
pub mod server;
pub mod state;

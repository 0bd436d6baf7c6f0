pub mod archive;
pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod http;
pub mod install;
pub mod progress;
pub mod registry;
pub mod runtime;
pub mod state;

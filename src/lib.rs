pub mod app;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fs_util;
pub mod output;
pub mod partition;
pub mod progress;
pub mod record;
pub mod sink;
pub mod source;

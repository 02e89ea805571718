pub mod api;
pub mod app;
pub mod audio;
pub mod cli;
pub mod config;
pub mod global;
pub mod notify;
pub mod recording;
pub mod store;
pub mod transcription;

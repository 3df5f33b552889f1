//! MediaCraft processing worker.

pub mod config;

pub use config::WorkerConfig;

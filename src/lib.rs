pub mod app;
pub mod binder;
pub mod calendar;
pub mod cli;
pub mod config;
pub mod dialog;
pub mod storage;
pub mod summary;
pub mod ui;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use storage::{MemoryStore, RecordStore, SqliteStore, StoreError, WeightRecord};

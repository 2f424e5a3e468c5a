pub mod config;
pub mod input_validation;
pub mod logging;
pub mod monitor;
pub mod path_validation;
pub mod scheduler;
pub mod system_integration;
pub mod upload;
pub mod watcher;


pub use config::{UploadConfig, WatchTarget};
pub use logging::LogManager;
pub use monitor::AutoUploadMonitor;
pub use upload::{
    HttpUploadClient, UploadClient, UploadCoordinator, UploadError, UploadEvent, UploadResult,
    UploadStats,
};
pub use watcher::{FileWatcher, WatchError};

pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

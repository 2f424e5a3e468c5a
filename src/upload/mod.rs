pub mod client;
pub mod coordinator;
pub mod stability;
pub mod types;

pub use client::{HttpUploadClient, UploadClient, UploadError, UploadResponse};
pub use coordinator::{EventListener, UploadCoordinator};
pub use stability::{DiskProbe, FileProbe, NotReady, StabilityWaiter};
pub use types::{PendingUpload, UploadEvent, UploadResult, UploadStats, WorkerState};

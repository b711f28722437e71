//! Asset upload service.
//!
//! Clients ask for a signed upload URL, upload directly to object storage,
//! then report the upload. The report schedules a confirmation job that runs
//! once the signed URL has expired; only confirmed assets can be downloaded.

pub mod config;
mod error;
pub mod manager;
pub mod routes;
pub mod storage;

pub use error::AssetError;
pub use manager::{AssetManager, ConfirmUpload};
pub use routes::{AppState, create_router};
pub use storage::{MemoryStorage, ObjectStorage, PresignedUrl};

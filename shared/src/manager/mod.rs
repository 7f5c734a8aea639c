mod error;
mod sync_manager;
mod sync_result;

pub use error::SyncError;
pub use sync_manager::SyncManager;
pub use sync_result::SyncResult;

mod sync_batch;
mod sync_command;

cfg_if! {
    if #[cfg(feature = "json")] {
        mod json;
        pub use json::JsonError;
    }
}

pub use sync_batch::SyncBatch;
pub use sync_command::{SyncCommand, WireOutcome};

mod change_log;
mod change_record;
mod error;
mod group_logs;
mod pending_result;

pub use change_log::ChangeLog;
pub use change_record::{ChangeKey, ChangeRecord, MethodOutcome, MethodTarget};
pub use error::ChangeLogError;
pub use group_logs::GroupLogs;
pub use pending_result::PendingResult;

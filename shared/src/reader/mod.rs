mod batch_reader;
mod error;
mod receive_report;
mod value_reader;

pub use batch_reader::BatchReader;
pub use error::ReceiveError;
pub use receive_report::ReceiveReport;
pub use value_reader::read_value;

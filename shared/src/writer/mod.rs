mod batch_writer;
mod path_stack;
mod value_writer;

pub use batch_writer::BatchWriter;
pub use path_stack::{name_segments, PathStack};
pub use value_writer::ValueWriter;

#[cfg(test)]
mod tests;

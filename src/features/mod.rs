pub mod diagnostics;
pub mod paths;
pub mod sink;
pub mod summary;

pub use sink::{CsvSink, ResultSink};
pub use summary::RunSummary;

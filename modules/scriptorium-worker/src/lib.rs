//! Task worker: turns at-least-once file-processing messages into
//! exactly-once-effect commits against the job store.

pub mod aggregation;
pub mod control;
pub mod extract;
pub mod worker;

pub use control::WorkerControl;
pub use extract::{ExtractOptions, ExtractionOutput, PlainTextExtractor, TextExtractor};
pub use worker::{TaskWorker, WorkerConfig};

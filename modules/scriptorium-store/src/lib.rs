//! Durable job and document stores.
//!
//! The job store is the single source of truth for "has this file or message
//! already been handled". Workers may pre-check cheaply, but correctness rests
//! on the conditional commit: one atomic operation that filters on the
//! processed sets and, in the same update, appends the result, records the
//! path/message id, and bumps the consumed counter. A losing concurrent writer
//! sees `AlreadyHandled`, never a double count.

pub mod document_store;
pub mod job_store;
pub mod memory;
pub mod pg;

pub use document_store::{DocumentStore, ReviewEntry};
pub use job_store::{CommitOutcome, JobStore};
pub use memory::{MemoryDocumentStore, MemoryJobStore};
pub use pg::{migrate, PgDocumentStore, PgJobStore};

//! Document preparation pipeline and batch driver.
//!
//! [`prepare_document`] runs one filing through canonicalization, table
//! resolution (with verbatim fallback for malformed tables) and anchoring.
//! [`run_batch`] fans a queue of documents out over a bounded worker pool and
//! writes one artifact bundle per success.

pub mod batch;
pub mod pipeline;

pub use batch::{
    bundle_dir_name, run_batch, BatchReport, DocumentJob, DocumentOutcome, DocumentResult,
    ProgressReporter, SilentProgress,
};
pub use pipeline::{prepare_document, PrepReport, PreparedDocument};

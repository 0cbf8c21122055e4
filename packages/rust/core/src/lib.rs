//! Ingest pipeline orchestration: source file → collect → transform → load.

mod pipeline;

pub use pipeline::{
    FileStats, IngestOptions, ProgressReporter, SilentProgress, SourceReport, collect_and_transform,
    run_ingest,
};

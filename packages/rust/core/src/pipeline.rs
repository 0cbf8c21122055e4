//! End-to-end ingest run: registry resolution → per-source file loop →
//! collect/transform streaming → bulk load → collection log.
//!
//! The run is single-threaded and sequential across sources and files:
//! processors resolve in dependency order (parcels before anything that
//! references a parcel key) and the store has one writer. Within a file,
//! records stream through collect → transform; transformed rows are loaded
//! in the processor's batch size.

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use parcelpipe_processors::{SourceProcessor, file_utils, registry};
use parcelpipe_shared::{CollectionStatus, LoadMode, NormalizedRow, Result};
use parcelpipe_storage::Storage;

// ---------------------------------------------------------------------------
// Options and reports
// ---------------------------------------------------------------------------

/// Configuration for one ingest run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Source identifiers to run (resolved against the registry up front).
    pub sources: Vec<String>,
    /// Explicit input files; when empty, files are discovered under
    /// `data_root/<source dir>/<pattern>`.
    pub files: Vec<PathBuf>,
    /// Administrative-code prefixes; transformed rows whose derived code
    /// matches none of them are dropped.
    pub region_prefixes: Vec<String>,
    /// Upsert (merge) or truncate-then-insert (full reload).
    pub mode: LoadMode,
    /// Root directory holding per-source subdirectories.
    pub data_root: PathBuf,
    /// How many row-level error messages to keep per source.
    pub error_samples: usize,
}

/// Per-source summary of an ingest run.
#[derive(Debug, Clone, Default)]
pub struct SourceReport {
    pub source: String,
    pub files: usize,
    /// Rows read from the source files (the true total, before filtering).
    pub read: u64,
    /// Rows written (or aggregated groups written) by the loader.
    pub loaded: u64,
    /// Rows without a resolvable key.
    pub skipped: u64,
    /// Rows dropped by the region prefix filter.
    pub filtered: u64,
    /// Row- and file-level errors.
    pub errors: u64,
    /// First few error messages, for triage.
    pub error_samples: Vec<String>,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a source's file list is known.
    fn source_started(&self, source: &str, files: usize);
    /// Called before each file is processed.
    fn file_started(&self, source: &str, file: &str, index: usize, total: usize);
    /// Called when a source completes.
    fn source_finished(&self, report: &SourceReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn source_started(&self, _source: &str, _files: usize) {}
    fn file_started(&self, _source: &str, _file: &str, _index: usize, _total: usize) {}
    fn source_finished(&self, _report: &SourceReport) {}
}

// ---------------------------------------------------------------------------
// Per-file streaming
// ---------------------------------------------------------------------------

/// Result of streaming one file through collect → transform.
#[derive(Debug, Default)]
pub struct FileStats {
    pub read: u64,
    pub skipped: u64,
    pub filtered: u64,
    pub errors: u64,
    pub rows: Vec<NormalizedRow>,
    pub error_samples: Vec<String>,
}

/// Stream one file through a processor, applying the region prefix filter
/// after transform (prefix derivation can require decoding the key first).
/// Row-level failures are counted and sampled, never fatal to the file.
pub fn collect_and_transform(
    processor: &dyn SourceProcessor,
    path: &Path,
    region_prefixes: &[String],
    sample_cap: usize,
) -> Result<FileStats> {
    let mut stats = FileStats::default();

    for item in processor.collect(path)? {
        stats.read += 1;
        match item.and_then(|raw| processor.transform(&raw)) {
            Ok(Some(row)) => {
                if region_matches(&row, region_prefixes) {
                    stats.rows.push(row);
                } else {
                    stats.filtered += 1;
                }
            }
            Ok(None) => stats.skipped += 1,
            Err(e) => {
                stats.errors += 1;
                if stats.error_samples.len() < sample_cap {
                    stats.error_samples.push(e.to_string());
                }
            }
        }
    }

    Ok(stats)
}

fn region_matches(row: &NormalizedRow, prefixes: &[String]) -> bool {
    if prefixes.is_empty() {
        return true;
    }
    match &row.region_code {
        // Sources without a derivable administrative code are exempt.
        None => true,
        Some(code) => prefixes.iter().any(|p| code.starts_with(p.as_str())),
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Run the ingest pipeline for the selected sources.
///
/// Source resolution and file discovery fail before any record I/O begins;
/// after that, file-level failures mark their collection-log row failed and
/// the run continues with the next file or source.
#[instrument(skip_all, fields(sources = options.sources.len(), mode = ?options.mode))]
pub async fn run_ingest(
    options: &IngestOptions,
    storage: &Storage,
    progress: &dyn ProgressReporter,
) -> Result<Vec<SourceReport>> {
    let processors = registry::resolve(&options.sources)?;

    // Discover every source's files up front so a missing directory aborts
    // before anything is written.
    let mut work: Vec<(Box<dyn SourceProcessor>, Vec<PathBuf>)> = Vec::new();
    for processor in processors {
        let files = discover_files(processor.as_ref(), options)?;
        work.push((processor, files));
    }

    let mut reports = Vec::new();
    for (processor, files) in work {
        let report = run_source(processor.as_ref(), &files, options, storage, progress).await;
        progress.source_finished(&report);
        reports.push(report);
    }
    Ok(reports)
}

fn discover_files(processor: &dyn SourceProcessor, options: &IngestOptions) -> Result<Vec<PathBuf>> {
    if !options.files.is_empty() {
        return Ok(options
            .files
            .iter()
            .filter(|f| processor.accepts_file(f))
            .cloned()
            .collect());
    }

    let dir = options.data_root.join(processor.data_dir());
    let files = file_utils::list_source_files(&dir, processor.file_pattern())?;
    let files: Vec<PathBuf> = files
        .into_iter()
        .filter(|f| processor.accepts_file(f))
        .collect();
    Ok(file_utils::filter_files_by_region(
        files,
        &options.region_prefixes,
    ))
}

async fn run_source(
    processor: &dyn SourceProcessor,
    files: &[PathBuf],
    options: &IngestOptions,
    storage: &Storage,
    progress: &dyn ProgressReporter,
) -> SourceReport {
    let mut report = SourceReport {
        source: processor.name().to_string(),
        files: files.len(),
        ..SourceReport::default()
    };
    progress.source_started(processor.name(), files.len());

    info!(source = processor.name(), files = files.len(), "source started");

    for (index, file) in files.iter().enumerate() {
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("?")
            .to_string();
        progress.file_started(processor.name(), &file_name, index + 1, files.len());

        let log_id = match storage.insert_collection_log(processor.name(), &file_name).await {
            Ok(id) => id,
            Err(e) => {
                warn!(source = processor.name(), error = %e, "collection log insert failed");
                report.errors += 1;
                continue;
            }
        };

        // A truncate reload clears the target exactly once, before the first
        // file; later files of the same run merge into the fresh table.
        let mode = match (options.mode, index) {
            (LoadMode::Truncate, 0) => LoadMode::Truncate,
            _ => LoadMode::Upsert,
        };

        let read_before = report.read;
        let outcome = process_file(processor, file, options, storage, mode, &mut report).await;
        let file_read = report.read - read_before;
        let (status, error) = match &outcome {
            Ok(()) => (CollectionStatus::Completed, None),
            Err(e) => (CollectionStatus::Failed, Some(e.to_string())),
        };
        if let Err(e) = storage
            .finalize_collection_log(&log_id, status, file_read as i64, error.as_deref())
            .await
        {
            warn!(source = processor.name(), error = %e, "collection log finalize failed");
        }

        if let Err(e) = outcome {
            // File-level failure: recorded, run continues with the next file.
            warn!(source = processor.name(), file = %file_name, error = %e, "file failed");
            report.errors += 1;
            if report.error_samples.len() < options.error_samples {
                report.error_samples.push(e.to_string());
            }
        }
    }

    info!(
        source = %report.source,
        read = report.read,
        loaded = report.loaded,
        skipped = report.skipped,
        filtered = report.filtered,
        errors = report.errors,
        "source finished"
    );
    report
}

async fn process_file(
    processor: &dyn SourceProcessor,
    file: &Path,
    options: &IngestOptions,
    storage: &Storage,
    mode: LoadMode,
    report: &mut SourceReport,
) -> Result<()> {
    let stats = collect_and_transform(
        processor,
        file,
        &options.region_prefixes,
        options.error_samples,
    )?;

    report.read += stats.read;
    report.skipped += stats.skipped;
    report.filtered += stats.filtered;
    report.errors += stats.errors;
    for sample in stats.error_samples {
        if report.error_samples.len() < options.error_samples {
            report.error_samples.push(sample);
        }
    }

    let outcome = storage.bulk_load(&processor.table(), &stats.rows, mode).await?;
    report.loaded += outcome.written;
    Ok(())
}

//! Transaction spreadsheet crawler.
//!
//! Downloads monthly transaction exports from the public portal across the
//! {property type × transaction kind × month} iteration space. Nationwide
//! queries are limited to a 31-day span per request, so arbitrary date
//! ranges split into month-aligned chunks; the portal also enforces an
//! opaque daily download quota, which halts the whole run when detected.
//! Files already on disk are skipped without a network request, which is
//! what makes re-running a partially failed crawl safe.

mod engine;
mod plan;

pub use engine::{Crawler, CrawlReport};
pub use plan::{Chunk, ChunkOutcome, PropertyType, TransactionKind, build_plan, month_ranges};

// Batch ingestion pipeline: extract, clean, dedup, guard, enrich, persist

pub mod chain;
pub mod coerce;
pub mod dedup;
pub mod deletion_guard;
pub mod enrich;
pub mod extractor;
pub mod persist;
pub mod quality_gate;
pub mod retry;
pub mod rules;
pub mod run_context;
pub mod scheduler;

// Re-export the types callers wire together
pub use chain::{ChainDispatcher, ChainIntent};
pub use enrich::ImageEnricher;
pub use extractor::{PageExtractor, PageOutcome, PageStatus};
pub use quality_gate::QualityFilter;
pub use rules::FilterRules;
pub use run_context::RunContext;
pub use scheduler::{BatchReport, BatchRun, BatchScheduler, RunRequest, StopReason};

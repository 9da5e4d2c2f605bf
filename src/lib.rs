pub mod database_ops;
pub mod normalization;
pub mod tracing;

pub mod util {
    pub mod db;
    pub mod env;
}

#[cfg(test)]
pub(crate) mod testing;

pub use database_ops::backfill::{Backfill, BackfillOptions, BackfillSummary};
pub use database_ops::bgg::{CandidateMatch, CatalogConfig, MatchOutcome};
pub use database_ops::resolution::{PipelineOutcome, ResolutionReport, Resolver};
pub use database_ops::store::{GameRecord, GameStore, PgGameStore, ResolutionStatus};

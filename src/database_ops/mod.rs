pub mod backfill;
pub mod bgg;
pub mod pacing;
pub mod resolution;
pub mod store;

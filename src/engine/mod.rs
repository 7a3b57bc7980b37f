//! Core engine: provider lookups with retry/fallback, and trend extrapolation.

pub mod fetcher;
pub mod retry;
pub mod trend;

pub use fetcher::AqiFetcher;

//! The synchronization engine: OAuth token upkeep, paginated fetching,
//! record reconciliation, and the per-run orchestrator that ties them
//! together over the repositories in `freightdesk-db`.

pub mod client;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod reconciler;
pub mod token;

pub use client::{CrmApiClient, HttpCrmClient, TokenGrant};
pub use error::SyncError;
pub use fetcher::{FetchSettings, Page, PageFetcher};
pub use orchestrator::SyncOrchestrator;
pub use reconciler::PageOutcome;
pub use token::TokenManager;

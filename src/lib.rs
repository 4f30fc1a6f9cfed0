//! Profile Resolver - resolves proof links to public profile pages
//!
//! This library provides:
//! - Search-engine driven lookup of profile URLs (Google, Bing, DuckDuckGo)
//! - Profile field extraction through ordered selector chains
//! - Proxy pools with rotation after repeated access walls
//! - CSV and spreadsheet query sources, append-only CSV output

pub mod config;
pub mod error;
pub mod extract;
pub mod input;
pub mod logging;
pub mod output;
pub mod pacing;
pub mod proxy;
pub mod resolver;
pub mod search;
pub mod session;

// Re-export main types for convenience
pub use crate::config::AppConfig;
pub use crate::error::{ResolverError, ResolverResult};
pub use crate::output::{CsvRecordSink, RecordSink};
pub use crate::resolver::{BatchSummary, ResolutionRecord, ResolutionStatus, Resolver};

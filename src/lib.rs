pub mod core;
pub mod features;
pub mod scraping;
pub mod tools;

#[cfg(any(test, feature = "test-utils"))]
#[doc(hidden)]
pub mod test_utils;

// --- Primary core exports ---
pub use core::types;
pub use core::types::*;
pub use core::{CrawlError, SessionError, SettlePolicy, VoterCrawlConfig};

// --- Flat module paths ---
pub use features::{paths, sink, summary};
pub use scraping::browser_manager;
pub use tools::{crawl, discovery, extractor, navigator, partition};

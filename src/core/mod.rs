pub mod config;
pub mod error;
pub mod settle;
pub mod types;

pub use config::{FormSelectors, VoterCrawlConfig};
pub use error::{CrawlError, SessionError};
pub use settle::{SettleMode, SettlePolicy};

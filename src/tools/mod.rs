pub mod crawl;
pub mod discovery;
pub mod extractor;
pub mod navigator;
pub mod partition;

pub use crawl::{CrawlOptions, Crawler, StopSignal};
pub use extractor::Extractor;
pub use navigator::{NavMode, Navigator};

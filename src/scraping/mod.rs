pub mod browser_manager;
pub mod scripts;
pub mod session;

pub use session::{ChromeSession, RawOption, SessionDriver};

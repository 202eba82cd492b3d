/// Live checks against a real Chromium and the public portal.
/// Run with: cargo test --test browser_smoke_test -- --ignored --nocapture
use std::time::Duration;

use voter_crawl::core::config::{FormSelectors, DEFAULT_PORTAL_URL};
use voter_crawl::core::types::Level;
use voter_crawl::scraping::browser_manager::{find_chrome_executable, LaunchOptions};
use voter_crawl::scraping::session::{ChromeSession, SessionDriver};
use voter_crawl::tools::discovery::discover;

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

#[tokio::test]
#[ignore]
async fn smoke_portal_lists_states() {
    init_logger();
    let Some(exe) = find_chrome_executable(None) else {
        println!("no browser installed, skipping");
        return;
    };
    let mut session = ChromeSession::launch(&LaunchOptions::new(exe))
        .await
        .expect("browser launch");

    session
        .navigate(DEFAULT_PORTAL_URL, Duration::from_secs(60))
        .await
        .expect("portal reachable");
    let selectors = FormSelectors::default();
    session
        .wait_for_selector(&selectors.state, Duration::from_secs(15))
        .await
        .expect("state control present");

    let states = discover(&mut session, &selectors.state, Level::State).await;
    println!("states: {:?}", states.iter().map(|s| &s.label).collect::<Vec<_>>());
    assert!(!states.is_empty());

    session.shutdown().await;
}

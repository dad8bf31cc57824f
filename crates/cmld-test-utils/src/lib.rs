//! cmld-test-utils: Test infrastructure for cmld services.
//!
//! Provides:
//! - FakeContainer: Recording container double
//! - wait_until: Polling helper for reactor-driven effects
//! - service_config_in: Service config rooted in a temporary directory

mod fake_container;

use std::path::Path;
use std::time::Duration;

use cmld_core::ServiceConfig;

pub use fake_container::FakeContainer;

/// Default timeout for [`wait_until`] in tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Yields to the runtime between polls so local tasks make progress.
/// Returns whether the condition was met.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Service config with the socket placed in `dir`.
pub fn service_config_in(dir: &Path) -> ServiceConfig {
    ServiceConfig::new().with_socket_dir(dir)
}

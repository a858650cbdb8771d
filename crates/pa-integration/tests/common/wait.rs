//! Polling helpers for asynchronous effects

use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test subscriber once; `RUST_LOG` controls the output
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Wait until `condition` holds, panicking with `what` on timeout
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let attempts = TIMEOUT.as_millis() / POLL_INTERVAL.as_millis();
    for _ in 0..attempts {
        if condition() {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!("timed out waiting for {what}");
}

//! Shared helpers for endpoint integration tests.

use std::future::Future;
use std::time::Duration;

/// Poll `f` until it reports true, or fail the test after ~5 seconds.
pub async fn eventually<F, Fut>(what: &str, mut f: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if f().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {}", what);
}

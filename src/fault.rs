//! Fault boundary for units of work that must not take the process down
//!
//! Worker iterations and health probes run behind [`catch_fault`]: a panic
//! inside the future is turned into an `Err` carrying the panic message, so
//! the owning loop (or report) can keep going.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Run `future` to completion, converting a panic into `Err(message)`
pub async fn catch_fault<F, T>(future: F) -> Result<T, String>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|payload| panic_message(payload.as_ref()))
}

/// Best-effort extraction of a panic payload's message
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

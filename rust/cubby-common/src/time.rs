//! Cross-platform time utilities.
//!
//! Wall-clock time is used for credential expiry and object timestamps,
//! monotonic time for cache ages. Both work on native and WASM targets.

use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use std::time::{Duration, SystemTime, UNIX_EPOCH};
pub use web_time::Instant;

/// Returns the current system time.
#[cfg(not(target_arch = "wasm32"))]
pub fn now() -> SystemTime {
    SystemTime::now()
}

/// Returns the current system time.
#[cfg(target_arch = "wasm32")]
pub fn now() -> SystemTime {
    use web_time::web::SystemTimeExt;
    web_time::SystemTime::now().to_std()
}

/// Returns the current time as a UTC datetime.
pub fn utc_now() -> DateTime<Utc> {
    DateTime::<Utc>::from(now())
}

/// Milliseconds since the unix epoch.
pub fn unix_millis() -> u64 {
    now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// A bounded wait ran out before the awaited future finished.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Gave up waiting after {0:?}")]
pub struct Elapsed(pub Duration);

/// Await `future`, giving up once `duration` has passed.
#[cfg(not(target_arch = "wasm32"))]
pub async fn timeout<F>(duration: Duration, future: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| Elapsed(duration))
}

/// Await `future`, giving up once `duration` has passed.
#[cfg(target_arch = "wasm32")]
pub async fn timeout<F>(duration: Duration, future: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    use futures_util::future::{Either, select};

    let future = std::pin::pin!(future);
    let timer = std::pin::pin!(sleep(duration));
    match select(future, timer).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right(_) => Err(Elapsed(duration)),
    }
}

/// Resolve after `duration`, using the global `setTimeout` so it works in
/// windows and workers alike.
#[cfg(target_arch = "wasm32")]
async fn sleep(duration: Duration) {
    use wasm_bindgen::{JsCast, JsValue};

    let millis = duration.as_millis().min(i32::MAX as u128) as i32;
    let promise = js_sys::Promise::new(&mut |resolve, reject| {
        let global = js_sys::global();
        let set_timeout = js_sys::Reflect::get(&global, &JsValue::from_str("setTimeout"))
            .ok()
            .and_then(|function| function.dyn_into::<js_sys::Function>().ok());
        let scheduled = set_timeout
            .map(|set_timeout| set_timeout.call2(&global, &resolve, &JsValue::from(millis)));
        if !matches!(scheduled, Some(Ok(_))) {
            let _ = reject.call1(&JsValue::NULL, &JsValue::from_str("setTimeout unavailable"));
        }
    });
    // A timer that cannot be scheduled counts as elapsed
    let _ = wasm_bindgen_futures::JsFuture::from(promise).await;
}

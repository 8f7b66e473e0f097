//! Cross-module serialization for host tests.
//!
//! libtest runs test functions on separate threads by default. Every test
//! in `kernel`, `mutex` and `cond` drives the single `static mut KERNEL`
//! through `with_kernel`, so two such tests running concurrently would race
//! on it. Each of those tests opens with `let _guard = test_support::lock();`
//! to serialize against every other test holding the same lock.

use std::sync::{Mutex, OnceLock};

static LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub(crate) fn lock() -> std::sync::MutexGuard<'static, ()> {
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

// Process-wide transfer library setup, shared by every engine instance.

use parking_lot::{const_mutex, Mutex};
use tracing::debug;

use crate::error::InitError;

/// Number of live `GlobalGuard`s. The lock also serializes the library's
/// global init/cleanup calls, which are not thread-safe.
static GLOBAL_USERS: Mutex<usize> = const_mutex(0);

/// Holds one reference on the transfer library's global state. Dropping the
/// guard performs the matching global cleanup.
#[derive(Debug)]
pub struct GlobalGuard {
    _private: (),
}

impl GlobalGuard {
    pub fn acquire() -> Result<Self, InitError> {
        let mut users = GLOBAL_USERS.lock();
        // SAFETY: global init is only ever called with the GLOBAL_USERS lock held.
        let code = unsafe { curl_sys::curl_global_init(curl_sys::CURL_GLOBAL_ALL) };
        if code != curl_sys::CURLE_OK {
            return Err(InitError::GlobalInit(code as i32));
        }
        *users += 1;
        debug!("transfer library global init, users={}", *users);
        Ok(Self { _private: () })
    }

    pub fn users() -> usize {
        *GLOBAL_USERS.lock()
    }
}

impl Drop for GlobalGuard {
    fn drop(&mut self) {
        let mut users = GLOBAL_USERS.lock();
        // SAFETY: paired with the successful init in `acquire`; libcurl keeps
        // its own init counter, so this only tears down on the last release.
        unsafe { curl_sys::curl_global_cleanup() };
        *users = users.saturating_sub(1);
        debug!("transfer library global cleanup, users={}", *users);
    }
}

//! Native services exposed to application code.

use bytes::Bytes;
use once_cell::sync::OnceCell;
use tracing::{debug, warn};
use uwsgi_ffi::{CACHE_FLAG_REPLACE, CACHE_FLAG_UPDATE, CACHE_MAX_KEY_LEN};

use crate::native::NativeCore;
use crate::registry::{SignalCallback, SignalTable};

/// Holds a cache lock for as long as it lives.
struct CacheLock<'a> {
    core: &'a dyn NativeCore,
}

impl<'a> CacheLock<'a> {
    fn read(core: &'a dyn NativeCore) -> Self {
        core.cache_read_lock();
        Self { core }
    }

    fn write(core: &'a dyn NativeCore) -> Self {
        core.cache_write_lock();
        Self { core }
    }
}

impl Drop for CacheLock<'_> {
    fn drop(&mut self) {
        self.core.cache_unlock();
    }
}

/// Signals, timers, user locks, the shared cache and process identity.
///
/// Every call maps to one native primitive. Failures come back as `false` or
/// `None`; none of them panics.
#[derive(Clone, Copy)]
pub struct Capabilities<'a> {
    core: &'a dyn NativeCore,
    signals: &'a SignalTable,
    modifier1: &'a OnceCell<u8>,
    plugin_name: &'a str,
}

impl<'a> Capabilities<'a> {
    pub(crate) fn new(
        core: &'a dyn NativeCore,
        signals: &'a SignalTable,
        modifier1: &'a OnceCell<u8>,
        plugin_name: &'a str,
    ) -> Self {
        Self {
            core,
            signals,
            modifier1,
            plugin_name,
        }
    }

    /// Raise a uWSGI signal.
    pub fn signal(&self, signum: u8) {
        self.core.signal_send(signum);
    }

    /// Acquire user lock `slot`. Not reentrant; pair with [`unlock`](Self::unlock).
    pub fn lock(&self, slot: i32) {
        self.core.user_lock(slot);
    }

    pub fn unlock(&self, slot: i32) {
        self.core.user_unlock(slot);
    }

    /// Raise `signum` once after `seconds`.
    pub fn add_timer(&self, signum: u8, seconds: i32) -> bool {
        self.core.add_timer(signum, seconds) == 0
    }

    /// Raise `signum` every `seconds`.
    pub fn add_recurring_timer(&self, signum: u8, seconds: i32) -> bool {
        self.core.add_rb_timer(signum, seconds) == 0
    }

    pub fn is_signal_registered(&self, signum: u8) -> bool {
        self.core.signal_registered(signum)
    }

    /// Register `callback` for `signum` on behalf of `owner`.
    ///
    /// The callback is kept until it is replaced by a later successful
    /// registration of the same signal.
    pub fn register_signal<F>(&self, signum: u8, owner: &str, callback: F) -> bool
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        let Some(modifier1) = self.modifier1() else {
            warn!(plugin = self.plugin_name, "cannot resolve plugin modifier; signal {signum} not registered");
            return false;
        };
        if self.core.register_signal(signum, owner, modifier1) != 0 {
            warn!(signum, owner, "native signal registration failed");
            return false;
        }
        self.signals.set(signum, SignalCallback::new(callback));
        true
    }

    /// The modifier tagging this plugin's signal registrations, resolved on first use.
    fn modifier1(&self) -> Option<u8> {
        self.modifier1
            .get_or_try_init(|| {
                let modifier1 = self.core.plugin_modifier1(self.plugin_name);
                u8::try_from(modifier1).map_err(|_| modifier1)
            })
            .ok()
            .copied()
    }

    fn cache_key<'k>(&self, key: &'k str) -> Option<&'k [u8]> {
        if !self.core.cache_enabled() {
            return None;
        }
        if key.len() > CACHE_MAX_KEY_LEN {
            debug!(len = key.len(), "cache key too long");
            return None;
        }
        Some(key.as_bytes())
    }

    /// Copy of the cached value, if present.
    pub fn cache_get(&self, key: &str) -> Option<Bytes> {
        let key = self.cache_key(key)?;
        let mut value = None;
        let _lock = CacheLock::read(self.core);
        self.core
            .cache_get(key, &mut |bytes: &[u8]| value = Some(Bytes::copy_from_slice(bytes)));
        value
    }

    pub fn cache_exists(&self, key: &str) -> bool {
        let Some(key) = self.cache_key(key) else {
            return false;
        };
        let _lock = CacheLock::read(self.core);
        self.core.cache_exists(key)
    }

    pub fn cache_delete(&self, key: &str) -> bool {
        let Some(key) = self.cache_key(key) else {
            return false;
        };
        let _lock = CacheLock::write(self.core);
        self.core.cache_delete(key) >= 0
    }

    /// Store `value` for `ttl` seconds (0: no expiry), inserting or replacing.
    pub fn cache_set(&self, key: &str, value: &[u8], ttl: u64) -> bool {
        self.cache_set_flags(key, value, ttl, CACHE_FLAG_REPLACE)
    }

    /// Replace an existing item only.
    pub fn cache_update(&self, key: &str, value: &[u8], ttl: u64) -> bool {
        self.cache_set_flags(key, value, ttl, CACHE_FLAG_UPDATE)
    }

    pub fn cache_set_flags(&self, key: &str, value: &[u8], ttl: u64, flags: u16) -> bool {
        let Some(key) = self.cache_key(key) else {
            return false;
        };
        let _lock = CacheLock::write(self.core);
        self.core.cache_set(key, value, ttl, flags) >= 0
    }

    pub fn worker_id(&self) -> i32 {
        self.core.worker_id()
    }

    pub fn helper_process_id(&self) -> i32 {
        self.core.mule_id()
    }

    pub fn log_size(&self) -> i64 {
        self.core.log_size()
    }
}

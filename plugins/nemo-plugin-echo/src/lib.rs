//! A demo plugin implementing the four-symbol ABI: logs each notified key
//! to stderr. Built as a `cdylib` so `nemo-rp -a` can `dlopen` it.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::sync::Once;

const NAME_BYTES: &[u8] = b"nemo-plugin-echo\0";
static INIT_LOGGING: Once = Once::new();

/// Returns the plugin's display name. The child calls this once, before
/// `nemo_init`, purely for logging.
#[no_mangle]
pub extern "C" fn nemo_name() -> *const c_char {
    NAME_BYTES.as_ptr() as *const c_char
}

/// One-time setup. Returns 0 on success; any other value is treated as a
/// fatal load failure by the sandboxing child.
#[no_mangle]
pub extern "C" fn nemo_init() -> c_int {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_writer(std::io::stderr).try_init();
    });
    tracing::info!("nemo-plugin-echo initialized");
    0
}

/// Called once per notified payload with four copies of its key (matching
/// the observed plugin ABI).
#[no_mangle]
pub extern "C" fn nemo_evnt(k0: u64, k1: u64, k2: u64, k3: u64) {
    tracing::info!(k0, k1, k2, k3, "event");
}

/// Teardown, called once before the sandboxing child exits.
#[no_mangle]
pub extern "C" fn nemo_free() {
    tracing::info!("nemo-plugin-echo shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_a_valid_c_string() {
        let ptr = nemo_name();
        let cstr = unsafe { CStr::from_ptr(ptr) };
        assert_eq!(cstr.to_str().unwrap(), "nemo-plugin-echo");
    }

    #[test]
    fn init_returns_success() {
        assert_eq!(nemo_init(), 0);
    }
}

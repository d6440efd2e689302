//! Environment variable limits and escaping.

use std::sync::OnceLock;

/// Variable carrying a drained request body.
pub const BODY_ENV_KEY: &str = "REQUEST_BODY";

const FALLBACK_PAGE_SIZE: usize = 4096;

/// Longest single `KEY=VALUE\0` string the kernel accepts (MAX_ARG_STRLEN).
pub fn max_env_len() -> usize {
    static LIMIT: OnceLock<usize> = OnceLock::new();
    *LIMIT.get_or_init(|| page_size() * 32)
}

/// Largest body that still fits in [`BODY_ENV_KEY`].
pub fn max_body_env_len() -> usize {
    max_env_len() - 2 - BODY_ENV_KEY.len()
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions and only reads system configuration.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        FALLBACK_PAGE_SIZE
    }
}

#[cfg(not(unix))]
fn page_size() -> usize {
    FALLBACK_PAGE_SIZE
}

/// Whether `key=value` would exceed the limit, counting `=` and the NUL.
pub fn too_large(key: &str, value: &str) -> bool {
    exceeds(key, value, max_env_len())
}

pub(crate) fn exceeds(key: &str, value: &str, limit: usize) -> bool {
    key.len() + value.len() + 2 > limit
}

/// Double every `$` so Kubernetes' `$(VAR)` expansion leaves the value alone.
pub fn escape_expansion(value: &str) -> String {
    value.replace('$', "$$")
}

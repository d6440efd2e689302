//! Labels carried by dispatched pods, and selector helpers.

pub const MANAGED_BY_KEY: &str = "app.kubernetes.io/managed-by";
pub const MANAGER: &str = "kcgid";

pub const GENERATION_KEY: &str = "kube-cgi.aic.cs.nycu.edu.tw/generation";
pub const PATH_KEY: &str = "kube-cgi.aic.cs.nycu.edu.tw/path";
pub const APISET_KEY: &str = "kube-cgi.aic.cs.nycu.edu.tw/apiset";
pub const RELEASED_KEY: &str = "kube-cgi.aic.cs.nycu.edu.tw/released";

/// Label values are capped at 63 characters.
const MAX_LABEL_VALUE: usize = 63;

/// Turn an API path into a DNS-label-safe name fragment.
///
/// `/Hello/World_2` becomes `hello-world-2`; the bare root path becomes
/// `root` so pod names never start with a dash.
pub fn namify(path: &str) -> String {
    let mapped: String = path
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
        .collect();
    let truncated: String = mapped.trim_matches('-').chars().take(MAX_LABEL_VALUE).collect();
    let trimmed = truncated.trim_end_matches('-');
    if trimmed.is_empty() {
        "root".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Render `key=value` pairs as a selector string.
pub fn selector(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

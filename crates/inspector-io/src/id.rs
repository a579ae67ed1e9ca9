//! Target identity: the per-process debug target id and the resolved
//! script location advertised to frontends.

use std::path::Path;

use uuid::Uuid;

/// Generates the stable target id for this bridge: an RFC 4122 version-4
/// UUID in canonical lowercase textual form.
///
/// Drawn from the operating system's cryptographic entropy source; if that
/// source is unavailable the process aborts rather than hand out a
/// predictable id.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Resolves the script's real filesystem path.
///
/// Returns the empty string when `script_name` is empty or resolution fails;
/// the target URL then degrades to a bare `file://`.
pub fn script_path(script_name: &str) -> String {
    if script_name.is_empty() {
        return String::new();
    }
    match std::fs::canonicalize(Path::new(script_name)) {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(_) => String::new(),
    }
}

/// Human-readable fallback title for the target when no script name is
/// available, e.g. `my-runtime[4242]`.
pub fn human_readable_process_name() -> String {
    let name = std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}[{}]", name, std::process::id())
}

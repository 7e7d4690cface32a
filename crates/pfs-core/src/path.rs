//! Path canonicalization.
//!
//! Paths are cleaned before every insertion and lookup. Cleaned paths are
//! root-relative: `"."` names the directory root, and no cleaned path starts
//! or ends with a separator. Keeping everything root-relative means the
//! upward walk `dir(dir(..))` always terminates at `"."`, which is what the
//! directory-recording logic in the driver relies on.

/// Clean `path` to canonical root-relative form.
///
/// Empty segments, `.` segments, and leading separators are dropped; `..`
/// pops the previous segment and saturates at the root. The root itself is
/// `"."`.
pub fn clean(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                // the root is its own parent
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        ".".to_string()
    } else {
        segments.join("/")
    }
}

/// Parent directory of a cleaned path. The root is its own parent.
pub fn dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => ".".to_string(),
    }
}

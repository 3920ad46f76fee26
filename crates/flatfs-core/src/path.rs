//! Normalized path handling.
//!
//! All layers agree on one canonical form: absolute, `/`-separated, no
//! trailing slash, no empty segments. The root is `"/"` and is the only path
//! with zero segments.

/// Normalize an arbitrary caller-supplied path to canonical form.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Parent of a normalized path; `None` for the root.
pub fn parent(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rsplit_once('/') {
        Some(("", _)) => Some("/".to_string()),
        Some((parent, _)) => Some(parent.to_string()),
        None => None,
    }
}

/// Basename of a normalized path; the root's basename is empty.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Join a child name onto a normalized folder path.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Number of segments; 0 for the root.
pub fn segment_count(path: &str) -> usize {
    if path == "/" {
        0
    } else {
        path.split('/').filter(|s| !s.is_empty()).count()
    }
}

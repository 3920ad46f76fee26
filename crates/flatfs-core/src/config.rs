use std::sync::Arc;

/// Predicate over a path's basename; matching names are invisible to the
/// driver and never trigger a remote round-trip.
pub type HiddenFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Options for one opened filesystem session. Nothing else configures the
/// core, and nothing here persists past the session.
#[derive(Clone, Default)]
pub struct SessionOptions {
    /// Default replace policy for operations that take a per-call override.
    pub replace_on_conflict: bool,
    /// Optional hidden-file filter.
    pub hidden: Option<HiddenFilter>,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_on_conflict(mut self, replace: bool) -> Self {
        self.replace_on_conflict = replace;
        self
    }

    pub fn hidden_filter(mut self, filter: HiddenFilter) -> Self {
        self.hidden = Some(filter);
        self
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("replace_on_conflict", &self.replace_on_conflict)
            .field("hidden", &self.hidden.is_some())
            .finish()
    }
}

/// Filter for macOS sidecar files: `.DS_Store` and AppleDouble `._*`
/// companions.
pub fn apple_double() -> HiddenFilter {
    Arc::new(|name: &str| name == ".DS_Store" || name.starts_with("._"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apple_double_filter() {
        let filter = apple_double();
        assert!(filter(".DS_Store"));
        assert!(filter("._photo.jpg"));
        assert!(!filter("photo.jpg"));
        assert!(!filter(".gitignore"));
    }

    #[test]
    fn test_defaults() {
        let opts = SessionOptions::new();
        assert!(!opts.replace_on_conflict);
        assert!(opts.hidden.is_none());
    }

    #[test]
    fn test_builder() {
        let opts = SessionOptions::new()
            .replace_on_conflict(true)
            .hidden_filter(apple_double());
        assert!(opts.replace_on_conflict);
        assert!(opts.hidden.is_some());
    }
}

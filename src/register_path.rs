//! Catalogue keys (spec §3): slash-separated, canonicalised register paths.

use std::fmt;

/// Canonical, slash-separated register identifier. `.` is accepted as an
/// alternate separator on construction and normalised to `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterPath(String);

impl RegisterPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        let normalised = path
            .as_ref()
            .replace('.', "/")
            .trim_start_matches('/')
            .trim_end_matches('/')
            .to_string();
        RegisterPath(normalised)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Parent module path, if any (e.g. `"BSP/VOID"` for `"BSP/VOID/0"`).
    pub fn parent(&self) -> Option<RegisterPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| RegisterPath(parent.to_string()))
    }

    pub fn join(&self, child: impl AsRef<str>) -> RegisterPath {
        if self.0.is_empty() {
            RegisterPath::new(child)
        } else {
            RegisterPath::new(format!("{}/{}", self.0, child.as_ref()))
        }
    }
}

impl fmt::Display for RegisterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RegisterPath {
    fn from(s: &str) -> Self {
        RegisterPath::new(s)
    }
}

impl From<String> for RegisterPath {
    fn from(s: String) -> Self {
        RegisterPath::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_separator_is_normalised() {
        assert_eq!(RegisterPath::new("BSP.VOID.0"), RegisterPath::new("BSP/VOID/0"));
    }

    #[test]
    fn leading_and_trailing_slashes_are_trimmed() {
        assert_eq!(RegisterPath::new("/BSP/WORD/"), RegisterPath::new("BSP/WORD"));
    }

    #[test]
    fn parent_strips_last_component() {
        let p = RegisterPath::new("BSP/VOID/0");
        assert_eq!(p.parent().unwrap(), RegisterPath::new("BSP/VOID"));
    }
}

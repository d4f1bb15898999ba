//
// ids.rs
//
// Identifiers for tests and source files
//

use std::borrow::Borrow;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Opaque name of a single test, compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for TestId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Absolute path of a source file, kept as the string the coverage probe reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Build from a filesystem path. Non-UTF-8 components are replaced lossily.
    pub fn from_path(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FileId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for FileId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_compare_by_value() {
        assert_eq!(TestId::from("tests/test_a.py"), TestId::new(String::from("tests/test_a.py")));
        assert_ne!(TestId::from("a"), TestId::from("b"));
    }

    #[test]
    fn test_borrow_allows_str_lookup() {
        let mut set = HashSet::new();
        set.insert(FileId::from("/src/a.py"));
        assert!(set.contains("/src/a.py"));
        assert!(!set.contains("/src/b.py"));
    }

    #[test]
    fn test_file_id_path_conversions() {
        let file = FileId::from_path(Path::new("/src/pkg/mod.py"));
        assert_eq!(file.as_str(), "/src/pkg/mod.py");
        assert_eq!(file.as_path(), Path::new("/src/pkg/mod.py"));
        assert!(!file.is_empty());
        assert!(FileId::from("").is_empty());
    }

    #[test]
    fn test_serde_is_transparent() {
        let json = serde_json::to_string(&TestId::from("t1")).unwrap();
        assert_eq!(json, "\"t1\"");
        let back: FileId = serde_json::from_str("\"/x.py\"").unwrap();
        assert_eq!(back, FileId::from("/x.py"));
    }
}

//
// influence_map.rs
//
// File -> line -> tests influence map
//

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::{IndexMap, IndexSet};

use crate::error::{CodemonError, Result};
use crate::ids::{FileId, TestId};

/// Line number -> tests that executed that line.
///
/// Test sets are ordered so iteration never depends on the order hits were recorded in.
pub type LineMap = BTreeMap<u32, BTreeSet<TestId>>;

/// Influence map shared between the builder and the change dispatcher.
///
/// Every read and write of the map goes through this one lock.
pub type SharedInfluenceMap = Arc<RwLock<InfluenceMap>>;

/// Wrap a map for sharing across tasks.
pub fn share(map: InfluenceMap) -> SharedInfluenceMap {
    Arc::new(RwLock::new(map))
}

/// Acquire a read guard, recovering the map if a writer panicked.
pub fn read_shared(map: &SharedInfluenceMap) -> RwLockReadGuard<'_, InfluenceMap> {
    map.read().unwrap_or_else(PoisonError::into_inner)
}

/// Acquire a write guard, recovering the map if a writer panicked.
pub fn write_shared(map: &SharedInfluenceMap) -> RwLockWriteGuard<'_, InfluenceMap> {
    map.write().unwrap_or_else(PoisonError::into_inner)
}

/// Coverage facts for a single source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfluence {
    file: FileId,
    lines: LineMap,
}

impl FileInfluence {
    pub fn new(file: FileId) -> Self {
        Self {
            file,
            lines: LineMap::new(),
        }
    }

    pub(crate) fn with_lines(file: FileId, lines: LineMap) -> Self {
        Self { file, lines }
    }

    pub fn file(&self) -> &FileId {
        &self.file
    }

    pub fn lines(&self) -> &LineMap {
        &self.lines
    }

    /// Tests that executed `line`, if any did.
    pub fn tests_at(&self, line: u32) -> Option<&BTreeSet<TestId>> {
        self.lines.get(&line)
    }

    /// Known to the map but no line of it was ever executed.
    pub fn is_untested(&self) -> bool {
        self.lines.is_empty()
    }

    /// Tests with at least one line here: ascending line order, then test order within a line.
    /// Repeats are not removed.
    pub fn affected_tests(&self) -> impl Iterator<Item = &TestId> {
        self.lines.values().flat_map(|tests| tests.iter())
    }

    fn add(&mut self, line: u32, test: &TestId) -> bool {
        let tests = self.lines.entry(line).or_default();
        if tests.contains(test) {
            return false;
        }
        tests.insert(test.clone())
    }
}

/// Ordered mapping of source file to its coverage facts.
///
/// File insertion order is significant: it fixes the traversal order of
/// [`InfluenceMap::suite`] and therefore the test indices assigned at
/// serialization time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfluenceMap {
    files: IndexMap<FileId, FileInfluence>,
}

impl InfluenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure `file` is present. Never overwrites an existing entry.
    ///
    /// Returns `true` when the file was newly added.
    pub fn touch(&mut self, file: &FileId) -> bool {
        if self.files.contains_key(file) {
            return false;
        }
        self.files
            .insert(file.clone(), FileInfluence::new(file.clone()));
        true
    }

    /// Record that `test` executed `line` of `file`, adding the file if needed.
    ///
    /// Idempotent: returns `false` when the fact was already known. Line 0 is
    /// not a valid source line and is ignored.
    pub fn record_hit(&mut self, file: &FileId, line: u32, test: &TestId) -> bool {
        if line == 0 {
            log::warn!("Ignoring hit on line 0 of {} from {}", file, test);
            return false;
        }
        self.touch(file);
        match self.files.get_mut(file) {
            Some(influence) => influence.add(line, test),
            None => false,
        }
    }

    /// Bulk form of [`InfluenceMap::record_hit`] for every line one test executed in a file.
    ///
    /// The file is added even when `lines` is empty. Returns the number of new facts.
    pub fn record_hits<I>(&mut self, file: &FileId, lines: I, test: &TestId) -> usize
    where
        I: IntoIterator<Item = u32>,
    {
        self.touch(file);
        lines
            .into_iter()
            .filter(|&line| self.record_hit(file, line, test))
            .count()
    }

    /// All known files, in insertion order.
    pub fn files(&self) -> impl Iterator<Item = &FileId> {
        self.files.keys()
    }

    /// Files present in the map with no recorded line hits, in insertion order.
    pub fn untested_files(&self) -> Vec<FileId> {
        self.files
            .values()
            .filter(|influence| influence.is_untested())
            .map(|influence| influence.file.clone())
            .collect()
    }

    pub fn get(&self, file: &FileId) -> Option<&FileInfluence> {
        self.files.get(file)
    }

    pub fn contains(&self, file: &FileId) -> bool {
        self.files.contains_key(file)
    }

    /// Drop a file and all of its line facts, keeping the order of the rest.
    pub fn remove(&mut self, file: &FileId) -> Option<FileInfluence> {
        self.files.shift_remove(file)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileInfluence> {
        self.files.values()
    }

    /// Deduplicated tests influenced by `files` (all known files when `None`).
    ///
    /// Files are visited in map insertion order regardless of the order of the
    /// filter, lines in ascending order; a test's first occurrence fixes its
    /// position. Any filter entry the map has never seen is `UnknownFile`.
    pub fn suite(&self, files: Option<&[FileId]>) -> Result<Vec<TestId>> {
        let filter: Option<HashSet<&FileId>> = match files {
            Some(files) => {
                if let Some(unknown) = files.iter().find(|f| !self.files.contains_key(*f)) {
                    return Err(CodemonError::UnknownFile {
                        file: unknown.clone(),
                    });
                }
                Some(files.iter().collect())
            }
            None => None,
        };

        let mut suite: IndexSet<&TestId> = IndexSet::new();
        for (file, influence) in &self.files {
            if filter.as_ref().is_some_and(|f| !f.contains(file)) {
                continue;
            }
            suite.extend(influence.affected_tests());
        }

        Ok(suite.into_iter().cloned().collect())
    }

    pub(crate) fn insert_influence(&mut self, influence: FileInfluence) {
        self.files.insert(influence.file.clone(), influence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(name: &str) -> FileId {
        FileId::from(name)
    }

    fn t(name: &str) -> TestId {
        TestId::from(name)
    }

    /// a.py: {1:{T1}, 2:{T1,T2}}, b.py: {4:{T3}}
    fn scenario_map() -> InfluenceMap {
        let mut map = InfluenceMap::new();
        map.record_hit(&f("a.py"), 1, &t("T1"));
        map.record_hit(&f("a.py"), 2, &t("T1"));
        map.record_hit(&f("a.py"), 2, &t("T2"));
        map.record_hit(&f("b.py"), 4, &t("T3"));
        map
    }

    #[test]
    fn test_touch_adds_untested_file() {
        let mut map = InfluenceMap::new();
        assert!(map.is_empty());

        assert!(map.touch(&f("other_file.py")));
        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get(&f("other_file.py")),
            Some(&FileInfluence::new(f("other_file.py")))
        );
        assert_eq!(map.untested_files(), vec![f("other_file.py")]);
    }

    #[test]
    fn test_touch_never_overwrites() {
        let mut map = InfluenceMap::new();
        map.record_hit(&f("a.py"), 3, &t("T1"));

        assert!(!map.touch(&f("a.py")));
        let influence = map.get(&f("a.py")).unwrap();
        assert!(!influence.is_untested());
        assert!(influence.tests_at(3).unwrap().contains(&t("T1")));
    }

    #[test]
    fn test_record_hit_is_idempotent() {
        let mut map = InfluenceMap::new();
        assert!(map.record_hit(&f("a.py"), 7, &t("T1")));
        assert!(!map.record_hit(&f("a.py"), 7, &t("T1")));

        let tests = map.get(&f("a.py")).unwrap().tests_at(7).unwrap();
        assert_eq!(tests.len(), 1);
        assert!(tests.contains(&t("T1")));
    }

    #[test]
    fn test_record_hit_ignores_line_zero() {
        let mut map = InfluenceMap::new();
        assert!(!map.record_hit(&f("a.py"), 0, &t("T1")));
        assert!(!map.contains(&f("a.py")));
    }

    #[test]
    fn test_record_hits_bulk() {
        let mut map = InfluenceMap::new();
        map.touch(&f("foo.py"));
        let added = map.record_hits(&f("bar.py"), [1, 3, 5], &t("test_bar"));
        assert_eq!(added, 3);

        assert_eq!(map.files().cloned().collect::<Vec<_>>(), vec![f("foo.py"), f("bar.py")]);
        assert_eq!(map.untested_files(), vec![f("foo.py")]);

        let bar = map.get(&f("bar.py")).unwrap();
        assert_eq!(bar.lines().keys().copied().collect::<Vec<_>>(), vec![1, 3, 5]);

        // Recording the same lines again changes nothing.
        assert_eq!(map.record_hits(&f("bar.py"), [1, 3, 5], &t("test_bar")), 0);
    }

    #[test]
    fn test_record_hits_with_no_lines_still_touches() {
        let mut map = InfluenceMap::new();
        assert_eq!(map.record_hits(&f("empty.py"), [], &t("T1")), 0);
        assert_eq!(map.untested_files(), vec![f("empty.py")]);
    }

    #[test]
    fn test_scenario_queries() {
        let map = scenario_map();

        assert!(map.untested_files().is_empty());
        assert_eq!(map.suite(Some(&[f("a.py")])).unwrap(), vec![t("T1"), t("T2")]);
        assert_eq!(map.suite(Some(&[f("b.py")])).unwrap(), vec![t("T3")]);
        assert_eq!(map.suite(None).unwrap(), vec![t("T1"), t("T2"), t("T3")]);
    }

    #[test]
    fn test_suite_follows_map_order_not_filter_order() {
        let map = scenario_map();
        let suite = map.suite(Some(&[f("b.py"), f("a.py")])).unwrap();
        assert_eq!(suite, vec![t("T1"), t("T2"), t("T3")]);
    }

    #[test]
    fn test_suite_orders_by_line_then_dedups() {
        let mut map = InfluenceMap::new();
        map.record_hits(&f("foo.py"), [3, 4], &t("test_foo_again"));
        map.record_hits(&f("foo.py"), [1, 2], &t("test_foo"));
        map.record_hits(&f("bar.py"), [1, 3, 5], &t("test_bar"));
        map.record_hit(&f("bar.py"), 9, &t("test_foo"));

        assert_eq!(
            map.suite(None).unwrap(),
            vec![t("test_foo"), t("test_foo_again"), t("test_bar")]
        );
        assert_eq!(
            map.suite(Some(&[f("bar.py")])).unwrap(),
            vec![t("test_bar"), t("test_foo")]
        );
    }

    #[test]
    fn test_suite_unknown_file() {
        let map = scenario_map();
        let err = map.suite(Some(&[f("a.py"), f("missing.py")])).unwrap_err();
        match err {
            CodemonError::UnknownFile { file } => assert_eq!(file, f("missing.py")),
            other => panic!("expected UnknownFile, got {other:?}"),
        }
    }

    #[test]
    fn test_suite_of_untested_file_is_empty() {
        let mut map = scenario_map();
        map.touch(&f("c.py"));
        assert!(map.suite(Some(&[f("c.py")])).unwrap().is_empty());
        assert_eq!(map.untested_files(), vec![f("c.py")]);
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut map = InfluenceMap::new();
        map.touch(&f("a.py"));
        map.touch(&f("b.py"));
        map.touch(&f("c.py"));

        assert!(map.remove(&f("b.py")).is_some());
        assert!(map.remove(&f("b.py")).is_none());
        assert_eq!(map.files().cloned().collect::<Vec<_>>(), vec![f("a.py"), f("c.py")]);
    }

    #[test]
    fn test_equality_ignores_hit_order() {
        let mut one = InfluenceMap::new();
        one.record_hit(&f("foo.py"), 1, &t("test_foo"));
        one.record_hit(&f("foo.py"), 1, &t("test_bar"));
        one.record_hit(&f("foo.py"), 5, &t("test_foo_again"));

        let mut two = InfluenceMap::new();
        two.record_hit(&f("foo.py"), 1, &t("test_bar"));
        two.record_hit(&f("foo.py"), 5, &t("test_foo_again"));
        two.record_hit(&f("foo.py"), 1, &t("test_foo"));

        assert_eq!(one, two);
    }

    #[test]
    fn test_shared_map_recovers_from_poison() {
        let shared = share(scenario_map());
        let clone = shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.write().unwrap();
            panic!("writer died");
        })
        .join();

        assert!(shared.is_poisoned());
        assert_eq!(read_shared(&shared).len(), 2);
        write_shared(&shared).touch(&f("c.py"));
        assert_eq!(read_shared(&shared).len(), 3);
    }
}

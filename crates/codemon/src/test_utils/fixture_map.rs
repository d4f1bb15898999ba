//! Deterministic influence map and source tree generator for benchmarks and tests.
//!
//! Generates synthetic projects with controlled characteristics: file count,
//! lines per file, test count, tests per executed line, and how often a file
//! is measured but never executed.
//!
//! Nothing here is random, so benchmarks are reproducible.

use std::fmt::Write;
use std::path::Path;

use tempfile::TempDir;

use crate::ids::{FileId, TestId};
use crate::influence_map::InfluenceMap;

/// Configuration for a generated project.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub file_count: usize,
    pub lines_per_file: u32,
    pub test_count: usize,
    pub tests_per_line: usize,
    /// Every n-th file is touched but untested (0 disables)
    pub untested_every: usize,
}

impl FixtureConfig {
    /// 10 files, 20 lines each, 15 tests.
    pub fn small() -> Self {
        Self {
            file_count: 10,
            lines_per_file: 20,
            test_count: 15,
            tests_per_line: 2,
            untested_every: 5,
        }
    }

    /// 100 files, 100 lines each, 200 tests.
    pub fn medium() -> Self {
        Self {
            file_count: 100,
            lines_per_file: 100,
            test_count: 200,
            tests_per_line: 3,
            untested_every: 10,
        }
    }

    /// 500 files, 300 lines each, 2000 tests.
    pub fn large() -> Self {
        Self {
            file_count: 500,
            lines_per_file: 300,
            test_count: 2000,
            tests_per_line: 4,
            untested_every: 25,
        }
    }

    fn is_untested(&self, index: usize) -> bool {
        self.untested_every > 0 && (index + 1) % self.untested_every == 0
    }
}

pub fn fixture_file_name(index: usize) -> String {
    format!("module_{index}.py")
}

pub fn fixture_test_name(index: usize) -> TestId {
    TestId::new(format!("tests/test_modules.py::test_case_{index}"))
}

/// Build an influence map keyed by `root`/`module_N.py`.
pub fn generate_influence_map(root: &Path, config: &FixtureConfig) -> InfluenceMap {
    let mut map = InfluenceMap::new();
    if config.test_count == 0 {
        return map;
    }

    for i in 0..config.file_count {
        let file = FileId::from_path(&root.join(fixture_file_name(i)));
        if config.is_untested(i) {
            map.touch(&file);
            continue;
        }
        for line in 1..=config.lines_per_file {
            for k in 0..config.tests_per_line {
                let test = (i * config.lines_per_file as usize + line as usize + k * 7)
                    % config.test_count;
                map.record_hit(&file, line, &fixture_test_name(test));
            }
        }
    }
    map
}

fn generate_source(index: usize, config: &FixtureConfig) -> String {
    let mut content = String::new();
    for line in 0..config.lines_per_file {
        // Writing to a String cannot fail
        let _ = writeln!(content, "value_{index}_{line} = {line} * {}", index + 1);
    }
    content
}

/// Write the generated sources into `dir` and return their identifiers.
pub fn write_fixture_sources(dir: &Path, config: &FixtureConfig) -> std::io::Result<Vec<FileId>> {
    (0..config.file_count)
        .map(|i| {
            let path = dir.join(fixture_file_name(i));
            std::fs::write(&path, generate_source(i, config))?;
            Ok(FileId::from_path(&path))
        })
        .collect()
}

/// Create a temporary project holding the generated sources.
///
/// The directory is removed when the `TempDir` is dropped.
pub fn create_fixture_sources(config: &FixtureConfig) -> std::io::Result<(TempDir, Vec<FileId>)> {
    let dir = TempDir::new()?;
    let files = write_fixture_sources(dir.path(), config)?;
    Ok((dir, files))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_preset_values() {
        let config = FixtureConfig::small();
        assert_eq!(config.file_count, 10);
        assert_eq!(config.lines_per_file, 20);
        assert_eq!(config.test_count, 15);
    }

    #[test]
    fn test_map_shape_matches_config() {
        let config = FixtureConfig::small();
        let map = generate_influence_map(Path::new("/proj"), &config);

        assert_eq!(map.len(), config.file_count);
        // files 4 and 9 are untested
        assert_eq!(map.untested_files().len(), 2);
        let first = map.get(&FileId::from("/proj/module_0.py")).unwrap();
        assert_eq!(first.lines().len(), config.lines_per_file as usize);
    }

    #[test]
    fn test_deterministic_output() {
        let config = FixtureConfig::small();
        let a = generate_influence_map(Path::new("/proj"), &config);
        let b = generate_influence_map(Path::new("/proj"), &config);
        assert_eq!(a, b);
        assert_eq!(a.suite(None).unwrap(), b.suite(None).unwrap());
    }

    #[test]
    fn test_sources_written() {
        let config = FixtureConfig::small();
        let (dir, files) = create_fixture_sources(&config).unwrap();

        assert_eq!(files.len(), config.file_count);
        let content = std::fs::read_to_string(dir.path().join("module_3.py")).unwrap();
        assert_eq!(content.lines().count(), config.lines_per_file as usize);
    }

    #[test]
    fn test_zero_tests_yields_empty_map() {
        let config = FixtureConfig {
            test_count: 0,
            ..FixtureConfig::small()
        };
        assert!(generate_influence_map(Path::new("/proj"), &config).is_empty());
    }
}

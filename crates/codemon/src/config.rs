//
// config.rs
//
// Configuration loaded from .codemonrc.json
//

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::error::{CodemonError, Result};
use crate::harness::OmissionFilter;
use crate::ids::TestId;

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = ".codemonrc.json";
/// Default persisted influence map file name
pub const DEFAULT_MAP_FILE: &str = ".codemonmap";
/// Default watcher poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Shell command lines used by the command-backed harness
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HarnessCommands {
    /// Prints one test identifier per line
    pub index: Option<String>,
    /// Runs one test (`{test}`) under coverage and prints a JSON probe report
    pub probe: Option<String>,
    /// Runs a suite (`{tests}`, space separated)
    pub run: Option<String>,
}

/// Codemon configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodemonConfig {
    /// Source roots the coverage probe should measure
    pub source: Vec<String>,
    /// Source patterns the coverage probe should not measure
    pub omit: Vec<String>,
    /// Test omission patterns (`*` matches anything, anchored at the start)
    pub omit_tests: Vec<String>,
    /// Where the influence map is persisted
    pub map_file: PathBuf,
    /// Watcher poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Give up watching after this many loop restarts (unlimited when unset)
    pub max_watcher_restarts: Option<usize>,
    pub commands: HarnessCommands,
    #[serde(skip)]
    omit_patterns: OmitPatterns,
}

impl Default for CodemonConfig {
    fn default() -> Self {
        Self {
            source: vec![".".to_string()],
            omit: Vec::new(),
            omit_tests: Vec::new(),
            map_file: PathBuf::from(DEFAULT_MAP_FILE),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_watcher_restarts: None,
            commands: HarnessCommands::default(),
            omit_patterns: OmitPatterns::default(),
        }
    }
}

impl CodemonConfig {
    /// Build a config programmatically with the given test omission patterns.
    pub fn with_omit_tests<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = Self {
            omit_tests: patterns.into_iter().map(Into::into).collect(),
            ..Self::default()
        };
        config.compile()?;
        Ok(config)
    }

    /// Parse a JSON config document.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(content)
            .map_err(|e| CodemonError::configuration(format!("error parsing config: {e}")))?;
        config.compile()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                log::debug!("Loading config from {}", path.display());
                Self::from_json_str(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}; using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(CodemonError::configuration(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn omit_patterns(&self) -> &OmitPatterns {
        &self.omit_patterns
    }

    fn compile(&mut self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(CodemonError::configuration("pollIntervalMs must be positive"));
        }
        if self.source.is_empty() {
            self.source.push(".".to_string());
        }
        self.omit_patterns = OmitPatterns::compile(&self.omit_tests)?;
        Ok(())
    }
}

impl OmissionFilter for CodemonConfig {
    fn is_omitted(&self, test: &TestId) -> bool {
        self.omit_patterns.matches(test.as_str())
    }
}

/// Compiled test omission patterns.
#[derive(Debug, Clone, Default)]
pub struct OmitPatterns {
    patterns: Vec<Regex>,
}

impl OmitPatterns {
    /// Compile wildcard patterns. Each is anchored at the start of the test
    /// identifier; `*` matches any run of characters and everything else is literal.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let p = p.as_ref();
                let body = p
                    .split('*')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(".*");
                Regex::new(&format!("^{body}")).map_err(|e| {
                    CodemonError::configuration(format!("invalid omitTests pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, test: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(test))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

//
// command_harness.rs
//
// TestHarness backed by configured shell commands
//

use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use anyhow::{anyhow, bail, Context};

use crate::config::{CodemonConfig, HarnessCommands};
use crate::error::CodemonError;
use crate::harness::{ProbeReport, TestHarness};
use crate::ids::TestId;

/// Runs tests through the `index`/`probe`/`run` command lines of the config.
///
/// Every command is executed with `sh -c`. `{test}` in the probe command and
/// `{tests}` in the run command are replaced by shell-quoted identifiers.
#[derive(Debug, Clone)]
pub struct CommandHarness {
    commands: HarnessCommands,
    source: Vec<String>,
    omit: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandHarness {
    pub fn new(commands: HarnessCommands) -> Self {
        Self {
            commands,
            source: Vec::new(),
            omit: Vec::new(),
            working_dir: None,
        }
    }

    pub fn from_config(config: &CodemonConfig) -> Self {
        Self {
            commands: config.commands.clone(),
            source: config.source.clone(),
            omit: config.omit.clone(),
            working_dir: None,
        }
    }

    /// Run every command from `dir` instead of the current directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command_line<'a>(&self, line: &'a Option<String>, key: &str) -> anyhow::Result<&'a str> {
        line.as_deref().ok_or_else(|| {
            anyhow!(CodemonError::configuration(format!(
                "no `commands.{key}` configured"
            )))
        })
    }

    fn shell(&self, line: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(line)
            .env("CODEMON_SOURCE", self.source.join(","))
            .env("CODEMON_OMIT", self.omit.join(","));
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn capture(&self, line: &str) -> anyhow::Result<Output> {
        log::debug!("Running: {}", line);
        let output = self
            .shell(line)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to spawn `{line}`"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("`{}` exited with {}: {}", line, output.status, stderr.trim());
        }
        Ok(output)
    }
}

/// Quote `word` for a POSIX shell.
fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

impl TestHarness for CommandHarness {
    fn index_tests(&self) -> anyhow::Result<Vec<TestId>> {
        let line = self.command_line(&self.commands.index, "index")?;
        let output = self.capture(line)?;
        let stdout = String::from_utf8(output.stdout).context("test index is not valid UTF-8")?;

        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(TestId::from)
            .collect())
    }

    fn probe(&self, test: &TestId) -> anyhow::Result<ProbeReport> {
        let template = self.command_line(&self.commands.probe, "probe")?;
        let line = template.replace("{test}", &shell_quote(test.as_str()));
        let output = self.capture(&line)?;

        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("probe of {test} did not print a valid report"))
    }

    fn execute_suite(&self, suite: &[TestId]) -> anyhow::Result<()> {
        let template = self.command_line(&self.commands.run, "run")?;
        let tests = suite
            .iter()
            .map(|t| shell_quote(t.as_str()))
            .collect::<Vec<_>>()
            .join(" ");
        let line = template.replace("{tests}", &tests);

        log::debug!("Running: {}", line);
        let status = self
            .shell(&line)
            .stdin(Stdio::null())
            .status()
            .with_context(|| format!("failed to spawn `{line}`"))?;
        // The runner prints its own results; a failing test is not an error here
        log::info!("Test run finished with {}", status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::FileId;
    use tempfile::TempDir;

    fn harness(index: Option<&str>, probe: Option<&str>, run: Option<&str>) -> CommandHarness {
        CommandHarness::new(HarnessCommands {
            index: index.map(str::to_string),
            probe: probe.map(str::to_string),
            run: run.map(str::to_string),
        })
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("tests/a.py::t"), "'tests/a.py::t'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_index_tests_splits_lines() {
        let h = harness(Some(r"printf 'T1\n  T2 \n\nT3\n'"), None, None);
        assert_eq!(
            h.index_tests().unwrap(),
            vec![TestId::from("T1"), TestId::from("T2"), TestId::from("T3")]
        );
    }

    #[test]
    fn test_missing_command_is_configuration_error() {
        let h = harness(None, None, None);
        let err = h.index_tests().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CodemonError>(),
            Some(CodemonError::Configuration { .. })
        ));
        assert!(h.probe(&TestId::from("T1")).is_err());
        assert!(h.execute_suite(&[TestId::from("T1")]).is_err());
    }

    #[test]
    fn test_failing_command_reports_stderr() {
        let h = harness(Some("echo collection broke >&2; exit 3"), None, None);
        let err = format!("{:#}", h.index_tests().unwrap_err());
        assert!(err.contains("collection broke"), "{err}");
    }

    #[test]
    fn test_probe_substitutes_test_and_parses_report() {
        let h = harness(
            None,
            Some(r#"printf '{"linesExecuted": {"/src/%s.py": [2, 1]}, "zeroLineFiles": ["/src/e.py"]}' {test}"#),
            None,
        );
        let report = h.probe(&TestId::from("mod_a")).unwrap();
        assert_eq!(
            report,
            ProbeReport::new()
                .with_lines("/src/mod_a.py", [1, 2])
                .with_zero_lines("/src/e.py")
        );
    }

    #[test]
    fn test_probe_invalid_output_is_error() {
        let h = harness(None, Some("echo not-json"), None);
        assert!(h.probe(&TestId::from("T1")).is_err());
    }

    #[test]
    fn test_probe_sees_coverage_scope() {
        let config = CodemonConfig::from_json_str(
            r#"{
                "source": ["app", "lib"],
                "omit": ["*/migrations/*"],
                "commands": {"probe": "printf '{\"zeroLineFiles\": [\"%s|%s\"]}' \"$CODEMON_SOURCE\" \"$CODEMON_OMIT\""}
            }"#,
        )
        .unwrap();
        let report = CommandHarness::from_config(&config)
            .probe(&TestId::from("T1"))
            .unwrap();
        assert!(report
            .zero_line_files
            .contains(&FileId::from("app,lib|*/migrations/*")));
    }

    #[test]
    fn test_execute_suite_substitutes_tests() {
        let dir = TempDir::new().unwrap();
        let h = harness(None, None, Some("echo {tests} > suite.txt; exit 1"))
            .with_working_dir(dir.path());

        // A failing test run is still a completed dispatch
        h.execute_suite(&[TestId::from("T1"), TestId::from("a b")]).unwrap();

        let written = std::fs::read_to_string(dir.path().join("suite.txt")).unwrap();
        assert_eq!(written.trim(), "T1 a b");
    }
}

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::debug;

/// Default bound on a single lint invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// External structural-lint collaborator. The contract is process-level
/// only: it is invoked once with the document path and the ruleset path,
/// and its exit code and captured output are surfaced verbatim.
#[derive(Debug, Clone)]
pub struct LintRunner {
    pub command: String,
    pub ruleset: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug)]
pub enum LintError {
    MissingRuleset(PathBuf),
    /// The lint binary could not be started at all.
    Unavailable(String),
    /// Non-zero exit; carries the tool's own output verbatim.
    Failed(String),
    TimedOut(Duration),
}

impl fmt::Display for LintError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LintError::MissingRuleset(path) => write!(f, "lint ruleset not found: {}", path.display()),
            LintError::Unavailable(e) => write!(f, "lint tool could not be run: {e}"),
            LintError::Failed(output) => write!(f, "lint: {output}"),
            LintError::TimedOut(timeout) => write!(f, "lint timed out after {}s", timeout.as_secs()),
        }
    }
}

impl LintRunner {
    pub fn new(command: &str, ruleset: &Path) -> LintRunner {
        LintRunner {
            command: command.to_string(),
            ruleset: ruleset.to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// One synchronous invocation. Failure is reported, never retried.
    pub fn run(&self, document: &Path) -> Result<(), LintError> {
        if !self.ruleset.is_file() {
            return Err(LintError::MissingRuleset(self.ruleset.clone()));
        }
        debug!(
            "running lint: {} {} --ruleset {}",
            self.command,
            document.display(),
            self.ruleset.display()
        );
        let mut child = Command::new(&self.command)
            .arg(document)
            .arg("--ruleset")
            .arg(&self.ruleset)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LintError::Unavailable(format!("{}: {e}", self.command)))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(LintError::TimedOut(self.timeout));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(LintError::Unavailable(e.to_string())),
            }
        }
        let output = child
            .wait_with_output()
            .map_err(|e| LintError::Unavailable(e.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let combined = format!("{}{}", stderr.trim(), stdout.trim());
            Err(LintError::Failed(combined))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ruleset_in(dir: &Path) -> PathBuf {
        let path = dir.join("rules.yaml");
        fs::write(&path, "rules: {}\n").unwrap();
        path
    }

    #[test]
    fn missing_ruleset_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runner = LintRunner::new("true", &dir.path().join("absent.yaml"));
        assert!(matches!(
            runner.run(&dir.path().join("doc.yaml")),
            Err(LintError::MissingRuleset(_))
        ));
    }

    #[test]
    fn missing_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ruleset = ruleset_in(dir.path());
        let runner = LintRunner::new("definitely-not-a-real-lint-binary", &ruleset);
        assert!(matches!(
            runner.run(&dir.path().join("doc.yaml")),
            Err(LintError::Unavailable(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn passing_tool_passes() {
        let dir = tempfile::tempdir().unwrap();
        let ruleset = ruleset_in(dir.path());
        let runner = LintRunner::new("true", &ruleset);
        assert!(runner.run(&dir.path().join("doc.yaml")).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn failing_tool_surfaces_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ruleset = ruleset_in(dir.path());
        let runner = LintRunner::new("false", &ruleset);
        assert!(matches!(
            runner.run(&dir.path().join("doc.yaml")),
            Err(LintError::Failed(_))
        ));
    }
}

//! Uniform results for the external tools we shell out to
//!
//! Extractors, blob compilers, injectors and signers all report failure the
//! same way: an exit code (or a signal), plus whatever they printed. We run them
//! through [`axoprocess::Cmd`][] with status checking turned off so that the
//! captured stderr can travel along with the error.

use axoprocess::Cmd;

use crate::DistResult;

/// What an external tool did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// The exit code, if the process exited normally
    pub code: Option<i32>,
    /// The signal that killed the process, if any (unix only)
    pub signal: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl ToolOutput {
    /// Did the tool exit 0?
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// A short human description of how the tool exited
    pub fn exit_description(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exit code {code}"),
            (None, Some(signal)) => format!("killed by signal {signal}"),
            (None, None) => "terminated abnormally".to_owned(),
        }
    }

    /// Trimmed stderr, falling back to stdout when stderr is empty
    ///
    /// Some tools report their errors on stdout.
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_owned()
        } else {
            stderr.to_owned()
        }
    }
}

impl From<std::process::Output> for ToolOutput {
    fn from(output: std::process::Output) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            output.status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: output.status.code(),
            signal,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Run a command to completion and capture everything it did
///
/// A non-zero exit is *not* an error here, callers map it to the error that
/// makes sense for their stage. Failing to spawn the tool at all is.
pub fn run_tool(cmd: &mut Cmd) -> DistResult<ToolOutput> {
    cmd.check(false);
    let output = cmd.output()?;
    Ok(ToolOutput::from(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_stderr_but_falls_back_to_stdout() {
        let mut out = ToolOutput {
            code: Some(1),
            signal: None,
            stdout: "  from stdout\n".to_owned(),
            stderr: "\n".to_owned(),
        };
        assert_eq!(out.diagnostics(), "from stdout");
        out.stderr = "boom\n".to_owned();
        assert_eq!(out.diagnostics(), "boom");
        assert!(!out.success());
        assert_eq!(out.exit_description(), "exit code 1");
    }

    #[test]
    fn signal_exit_is_described() {
        let out = ToolOutput {
            code: None,
            signal: Some(9),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(out.exit_description(), "killed by signal 9");
    }

    #[cfg(unix)]
    #[test]
    fn captures_failing_tool() {
        let mut cmd = Cmd::new("sh", "run a failing script");
        cmd.arg("-c").arg("echo nope >&2; exit 3");
        let out = run_tool(&mut cmd).unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.diagnostics(), "nope");
    }
}

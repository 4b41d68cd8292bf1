//! Running external tools (`cp`, `journalctl`, `rpm-ostree`, `systemctl`).

use crate::utils::{KeeperError, Result};
use std::ffi::OsStr;
use std::process::Command;

/// Runs `program` with `args` and returns its stdout.
/// A non-zero exit status is reported together with the trimmed stderr.
pub fn run<I, S>(program: &str, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    let rendered = render(&cmd);

    let output = cmd
        .output()
        .map_err(|e| KeeperError::io(format!("failed to execute `{}`", rendered), e))?;

    if !output.status.success() {
        return Err(KeeperError::Command {
            command: rendered,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    tracing::debug!(command = %rendered, "Command finished");
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn render(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_returns_stdout() -> Result<()> {
        assert_eq!(run("echo", ["hello"])?.trim(), "hello");
        Ok(())
    }

    #[test]
    fn test_run_reports_failure_with_stderr() {
        let err = run("sh", ["-c", "echo broken >&2; exit 3"]).unwrap_err();
        match err {
            KeeperError::Command { command, stderr } => {
                assert_eq!(command, "sh -c echo broken >&2; exit 3");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_run_missing_program() {
        let err = run("datakeeper-no-such-program", Vec::<&str>::new()).unwrap_err();
        assert!(matches!(err, KeeperError::Io { .. }));
    }
}

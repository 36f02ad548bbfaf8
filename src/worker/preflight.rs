//! Preflight checks
//!
//! Before a run starts, the copy tool must be present where jobs will run:
//! on the local PATH, or on every remote target (and `ssh` locally).

use crate::error::WorkerError;
use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Find `program` on `path_var` (a PATH-style list)
pub fn find_in_path(program: &str, path_var: &std::ffi::OsStr) -> Option<PathBuf> {
    env::split_paths(path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

/// Check that `program` is on the local PATH
pub fn check_local_tool(program: &str) -> Result<PathBuf, WorkerError> {
    let path_var = env::var_os("PATH").unwrap_or_default();
    let found = find_in_path(program, &path_var).ok_or_else(|| WorkerError::ToolMissing {
        tool: program.to_string(),
        target: "local".into(),
    })?;
    debug!(tool = program, path = %found.display(), "Found tool");
    Ok(found)
}

/// Check that `program` can be run on `target`
pub fn check_remote_tool(target: &str, program: &str) -> Result<(), WorkerError> {
    let status = Command::new("ssh")
        .args(["-q", "-o", "BatchMode=yes"])
        .arg(target)
        .arg(format!("command -v {} >/dev/null", program))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| WorkerError::ToolMissing {
            tool: "ssh".into(),
            target: format!("local ({})", e),
        })?;

    if !status.success() {
        return Err(WorkerError::ToolMissing {
            tool: program.to_string(),
            target: target.to_string(),
        });
    }
    debug!(tool = program, target, "Found remote tool");
    Ok(())
}

/// Check `program` wherever jobs will run
pub fn check_tool(program: &str, targets: &[String]) -> Result<(), WorkerError> {
    if targets.is_empty() {
        check_local_tool(program)?;
        return Ok(());
    }
    check_local_tool("ssh")?;
    for target in targets {
        check_remote_tool(target, program)?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn test_find_in_path() {
        let dir = tempdir().unwrap();
        let tool = dir.path().join("mytool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        let plain = dir.path().join("notexec");
        std::fs::write(&plain, "").unwrap();
        std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o644)).unwrap();

        let path_var = env::join_paths(["/nonexistent", dir.path().to_str().unwrap()]).unwrap();
        assert_eq!(find_in_path("mytool", &path_var), Some(tool));
        assert_eq!(find_in_path("notexec", &path_var), None);
        assert_eq!(find_in_path("missing", &path_var), None);
    }

    #[test]
    fn test_check_local_tool() {
        assert!(check_local_tool("sh").is_ok());
        let err = check_local_tool("partsync-no-such-tool").unwrap_err();
        assert!(err.to_string().contains("partsync-no-such-tool"));
    }
}

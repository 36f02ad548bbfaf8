//! Shell command hooks
//!
//! The partition context is exported to the command's environment:
//!
//! | Variable | Value |
//! |---|---|
//! | `PARTSYNC_HOOK` | `pre-open` or `post-close` |
//! | `PARTSYNC_PART_INDEX` | partition index |
//! | `PARTSYNC_PART_FILE` | listing file, empty when listing to stdout |
//! | `PARTSYNC_PART_SIZE` | total size, preload included |
//! | `PARTSYNC_PART_ENTRIES` | entry count |
//! | `PARTSYNC_PID` | pid of the partitioning process |

use crate::error::{HookError, HookResult};
use crate::hook::{HookContext, HookKind, PartitionHook};
use std::process::{Command, Stdio};
use tracing::debug;

/// Runs a shell command at one partition boundary
#[derive(Debug, Clone)]
pub struct CommandHook {
    kind: HookKind,
    command: String,
    shell: String,
}

impl CommandHook {
    /// Run `command` through `/bin/sh -c` at `kind` boundaries
    pub fn new(kind: HookKind, command: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
            shell: "/bin/sh".into(),
        }
    }

    /// Hook run when a partition opens
    pub fn pre_open(command: impl Into<String>) -> Self {
        Self::new(HookKind::PreOpen, command)
    }

    /// Hook run after a partition closes
    pub fn post_close(command: impl Into<String>) -> Self {
        Self::new(HookKind::PostClose, command)
    }

    /// Boundary this hook runs at
    pub fn kind(&self) -> HookKind {
        self.kind
    }

    /// Build the command for `ctx`
    fn command_for(&self, ctx: &HookContext<'_>) -> Command {
        let listing = ctx
            .listing
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&self.command)
            .env("PARTSYNC_HOOK", ctx.kind.as_str())
            .env("PARTSYNC_PART_INDEX", ctx.index.to_string())
            .env("PARTSYNC_PART_FILE", listing)
            .env("PARTSYNC_PART_SIZE", ctx.total_size.to_string())
            .env("PARTSYNC_PART_ENTRIES", ctx.entry_count.to_string())
            .env("PARTSYNC_PID", std::process::id().to_string())
            .stdin(Stdio::null())
            // Keep stdout free for listings
            .stdout(Stdio::from(std::io::stderr()));
        cmd
    }

    fn invoke(&self, ctx: &HookContext<'_>) -> HookResult<()> {
        debug!(hook = %ctx.kind, partition = ctx.index, command = %self.command, "Running hook");
        let status = self
            .command_for(ctx)
            .status()
            .map_err(|e| HookError::Spawn {
                kind: ctx.kind.as_str(),
                command: self.command.clone(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(HookError::Status {
                kind: ctx.kind.as_str(),
                command: self.command.clone(),
                status: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}

impl PartitionHook for CommandHook {
    fn describe(&self) -> String {
        format!("{} '{}'", self.kind, self.command)
    }

    fn pre_open(&mut self, ctx: &HookContext<'_>) -> HookResult<()> {
        if self.kind == HookKind::PreOpen {
            self.invoke(ctx)?;
        }
        Ok(())
    }

    fn post_close(&mut self, ctx: &HookContext<'_>) -> HookResult<()> {
        if self.kind == HookKind::PostClose {
            self.invoke(ctx)?;
        }
        Ok(())
    }
}

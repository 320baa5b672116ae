//! Historical container log retrieval.

use std::time::Duration;

use dockscope_common::error::{DockscopeError, Result};
use dockscope_common::types::ContainerId;

use crate::docker::LogCommand;
use crate::exec;

/// Resolves the line count for a history fetch.
///
/// Missing or non-positive requests fall back to `default`; anything above
/// `max` is clamped.
#[must_use]
pub fn effective_lines(requested: Option<i64>, default: u32, max: u32) -> u32 {
    match requested {
        Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX).min(max),
        _ => default.min(max),
    }
}

/// Fetches the last `lines` lines of a container's log.
///
/// Only a zero exit status counts as success; anything else is reported
/// with the command's stderr.
///
/// # Errors
///
/// Returns [`DockscopeError::CommandFailed`] on a non-zero exit, or the
/// launch/timeout errors of [`exec::run_to_completion`].
pub async fn fetch_history(
    commands: &dyn LogCommand,
    container: &ContainerId,
    lines: u32,
    limit: Duration,
) -> Result<String> {
    let command = commands.history(container, lines);
    tracing::info!(container = %container, lines, "fetching container log history");

    let output = exec::run_to_completion(&command, limit).await?;
    if !output.success() {
        tracing::warn!(
            container = %container,
            exit_code = output.exit_code,
            stderr = %output.stderr.trim_end(),
            "log history command failed"
        );
        return Err(DockscopeError::CommandFailed {
            exit_code: output.exit_code,
            stderr: output.stderr.trim_end().to_owned(),
        });
    }

    tracing::debug!(container = %container, lines = output.stdout.lines().count(), "log history fetched");
    Ok(output.stdout)
}

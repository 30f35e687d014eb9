//! Textual checkpoint format.
//!
//! A checkpoint is a single window start time rendered as
//! `YYYY-MM-DD HH:MM:SS` in UTC. Parsing is lenient about surrounding
//! whitespace so a trailing newline written by hand does not invalidate it.

use crate::error::{Error, Result};
use crate::Timestamp;
use chrono::NaiveDateTime;

/// `strftime` pattern used for checkpoints and configured times.
pub const CHECKPOINT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render a window start for the checkpoint file.
pub fn format_checkpoint(start: Timestamp) -> String {
    start.format(CHECKPOINT_FORMAT).to_string()
}

/// Parse checkpoint text back into a window start.
pub fn parse_checkpoint(text: &str) -> Result<Timestamp> {
    let trimmed = text.trim();
    NaiveDateTime::parse_from_str(trimmed, CHECKPOINT_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::InvalidCheckpoint {
            text: trimmed.to_string(),
            reason: e.to_string(),
        })
}

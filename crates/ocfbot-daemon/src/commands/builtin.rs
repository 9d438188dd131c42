//! The built-in command set.

use super::{CommandEntry, accounts, check, lab};

/// Every built-in command, in dispatch order.
pub fn builtin_commands() -> Result<Vec<CommandEntry>, regex::Error> {
    let mut entries = accounts::commands();
    entries.extend(check::commands());
    entries.extend(lab::commands()?);
    Ok(entries)
}

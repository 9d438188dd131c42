//! Lab occupancy rules.

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures::future::BoxFuture;
use regex::Regex;
use tracing::error;

use super::{CommandEntry, Invocation, LookupError, Reply};
use crate::context::BotContext;

/// A staff member logged in to a lab desktop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabSession {
    pub user: String,
    pub host: String,
}

/// Live lab statistics.
#[async_trait]
pub trait LabStats: Send + Sync {
    async fn staff_in_lab(&self) -> Result<Vec<LabSession>, LookupError>;

    async fn users_in_lab_count(&self) -> Result<u32, LookupError>;
}

/// Stand-in used when lab statistics are not configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLabStats;

#[async_trait]
impl LabStats for NoLabStats {
    async fn staff_in_lab(&self) -> Result<Vec<LabSession>, LookupError> {
        Err(LookupError::Unavailable("lab stats"))
    }

    async fn users_in_lab_count(&self) -> Result<u32, LookupError> {
        Err(LookupError::Unavailable("lab stats"))
    }
}

/// Insert a word joiner after the first character so the name does not
/// highlight its owner.
pub fn prevent_ping(name: &str) -> String {
    let mut chars = name.chars();
    chars.next().map_or_else(String::new, |first| {
        format!("{first}\u{2060}{}", chars.as_str())
    })
}

/// The `who is in the lab` summary line.
pub fn occupancy_summary(total: u32, staff: &BTreeSet<String>) -> String {
    let people = if total == 1 {
        "is 1 person".to_string()
    } else {
        format!("are {total} people")
    };
    let names = if staff.is_empty() {
        String::new()
    } else {
        let names: Vec<String> = staff.iter().map(|s| prevent_ping(s)).collect();
        format!(": {}", names.join(", "))
    };
    format!(
        "there {people} in the lab, including {} staff{names}",
        staff.len()
    )
}

pub fn commands() -> Result<Vec<CommandEntry>, regex::Error> {
    Ok(vec![
        CommandEntry::rule(
            "in_lab",
            "Check if a staffer is in the lab.",
            Regex::new(r"is ([a-z]+) in the lab")?,
            in_lab,
        ),
        CommandEntry::rule(
            "who_is_in_lab",
            "Report on who is currently in the lab.",
            Regex::new(r"(who is|who's) in the lab")?,
            who_is_in_lab,
        ),
        CommandEntry::rule(
            "witl",
            "Report on who is currently in the lab.",
            Regex::new(r"(?i)w+i+t+l+")?,
            who_is_in_lab,
        ),
    ])
}

fn in_lab<'a>(ctx: &'a BotContext, inv: &'a Invocation) -> BoxFuture<'a, Vec<Reply>> {
    Box::pin(async move {
        let Some(user) = inv.group(1) else {
            return Vec::new();
        };
        match ctx.lab.staff_in_lab().await {
            Ok(sessions) if sessions.iter().any(|s| s.user == user) => {
                vec![Reply::ping(format!("{user} is in the lab"))]
            }
            Ok(_) => vec![Reply::ping(format!("{user} is not in the lab"))],
            Err(e) => {
                error!(error = %e, "Failed to load lab sessions");
                vec![Reply::ping("failed to check the lab, sorry!")]
            }
        }
    })
}

fn who_is_in_lab<'a>(ctx: &'a BotContext, _inv: &'a Invocation) -> BoxFuture<'a, Vec<Reply>> {
    Box::pin(async move {
        let stats = async {
            let staff: BTreeSet<String> = ctx
                .lab
                .staff_in_lab()
                .await?
                .into_iter()
                .map(|s| s.user)
                .collect();
            let total = ctx.lab.users_in_lab_count().await?;
            Ok::<_, LookupError>((total, staff))
        };
        match stats.await {
            Ok((total, staff)) => vec![Reply::ping(occupancy_summary(total, &staff))],
            Err(e) => {
                error!(error = %e, "Failed to load lab occupancy");
                vec![Reply::ping("failed to check the lab, sorry!")]
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn prevent_ping_inserts_word_joiner() {
        assert_eq!(prevent_ping("bob"), "b\u{2060}ob");
        assert_eq!(prevent_ping("x"), "x\u{2060}");
        assert_eq!(prevent_ping(""), "");
    }

    #[test]
    fn summary_wording() {
        assert_eq!(
            occupancy_summary(1, &BTreeSet::new()),
            "there is 1 person in the lab, including 0 staff"
        );
        let staff = BTreeSet::from(["zed".to_string(), "amy".to_string()]);
        assert_eq!(
            occupancy_summary(12, &staff),
            "there are 12 people in the lab, including 2 staff: a\u{2060}my, z\u{2060}ed"
        );
        assert_eq!(
            occupancy_summary(0, &BTreeSet::new()),
            "there are 0 people in the lab, including 0 staff"
        );
    }

    #[test]
    fn rules_compile_and_match() {
        let entries = commands().unwrap();
        assert_eq!(entries.len(), 3);
        let witl = &entries[2];
        let msg = crate::commands::IncomingMessage::new("a", "#ocf", "WIIITL");
        assert!(witl.matches(".", &msg).is_some());
    }
}

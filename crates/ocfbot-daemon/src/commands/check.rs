//! User lookup commands: `check` and `checkacct`.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::{debug, error};

use super::{CommandEntry, Invocation, LookupError, Reply};
use crate::context::BotContext;

/// Where the system group database lives.
pub const GROUP_FILE: &str = "/etc/group";

/// Maximum number of people returned by `checkacct`.
pub const SEARCH_LIMIT: usize = 5;

/// Directory attributes of one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAttrs {
    pub uid_number: u32,
    pub gid_number: u32,
    /// Common name (full name).
    pub cn: String,
    pub creation_time: Option<DateTime<Utc>>,
}

/// One result of a people search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonEntry {
    pub uid: String,
    pub cn: String,
}

/// The account directory.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn user_attrs(&self, user: &str) -> Result<Option<UserAttrs>, LookupError>;

    /// Search people with an LDAP filter, returning at most `size_limit`
    /// entries.
    async fn search_people(
        &self,
        filter: &str,
        size_limit: usize,
    ) -> Result<Vec<PersonEntry>, LookupError>;
}

/// Stand-in used when no directory is configured; every lookup fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDirectory;

#[async_trait]
impl Directory for NoDirectory {
    async fn user_attrs(&self, _user: &str) -> Result<Option<UserAttrs>, LookupError> {
        Err(LookupError::Unavailable("directory"))
    }

    async fn search_people(
        &self,
        _filter: &str,
        _size_limit: usize,
    ) -> Result<Vec<PersonEntry>, LookupError> {
        Err(LookupError::Unavailable("directory"))
    }
}

/// A Unix group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// Groups as listed in a `group(5)` file.
#[derive(Debug, Clone, Default)]
pub struct GroupDatabase {
    groups: Vec<Group>,
}

impl GroupDatabase {
    /// Parse `name:password:gid:member,member` lines. Blank, comment and
    /// malformed lines are skipped.
    pub fn parse(content: &str) -> Self {
        let groups = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let mut fields = line.split(':');
                let name = fields.next()?;
                let _password = fields.next()?;
                let gid = fields.next()?.parse().ok()?;
                let members = fields
                    .next()
                    .unwrap_or("")
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect();
                Some(Group {
                    name: name.to_string(),
                    gid,
                    members,
                })
            })
            .collect();
        Self { groups }
    }

    pub fn load(path: &Path) -> ocfbot_core::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let db = Self::parse(&content);
        debug!(path = %path.display(), groups = db.groups.len(), "Loaded group database");
        Ok(db)
    }

    pub fn by_gid(&self, gid: u32) -> Option<&Group> {
        self.groups.iter().find(|g| g.gid == gid)
    }

    /// Names of the groups listing `user` as a member, sorted.
    pub fn supplementary_groups(&self, user: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .groups
            .iter()
            .filter(|g| g.members.iter().any(|m| m == user))
            .map(|g| g.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// IRC colour code for well-known groups.
pub fn group_color(group: &str) -> &'static str {
    match group {
        "ocf" => "\x0314",
        "sorry" => "\x0304",
        "opstaff" => "\x0303",
        "ocfstaff" => "\x0302",
        "ocfroot" => "\x0307",
        "ocfapphost" => "\x0310",
        "ocfofficers" => "\x0306",
        "ocfalumni" => "\x0313",
        _ => "",
    }
}

fn colored(group: &str) -> String {
    format!("{}{group}\x0f", group_color(group))
}

/// Reduce a search keyword to lowercase ASCII letters.
pub fn alphanum(word: &str) -> String {
    word.chars()
        .flat_map(char::to_lowercase)
        .filter(char::is_ascii_lowercase)
        .collect()
}

/// LDAP filter requiring every keyword to match either uid or cn.
pub fn search_filter<'a>(keywords: impl IntoIterator<Item = &'a str>) -> String {
    let clauses: String = keywords
        .into_iter()
        .map(|keyword| {
            let keyword = alphanum(keyword);
            format!("(|(uid=*{keyword}*)(cn=*{keyword}*))")
        })
        .collect();
    format!("(&{clauses})")
}

pub fn commands() -> Vec<CommandEntry> {
    vec![
        CommandEntry::command("check", "Print information about an OCF user.", check),
        CommandEntry::command("checkacct", "Print matching OCF usernames.", checkacct),
    ]
}

fn check<'a>(ctx: &'a BotContext, inv: &'a Invocation) -> BoxFuture<'a, Vec<Reply>> {
    Box::pin(async move {
        let Some(user) = inv.first_arg() else {
            return vec![Reply::ping("usage: check <username>")];
        };
        let attrs = match ctx.directory.user_attrs(user).await {
            Ok(Some(attrs)) => attrs,
            Ok(None) => return vec![Reply::plain(format!("{user} does not exist"))],
            Err(e) => {
                error!(user, error = %e, "User lookup failed");
                return vec![Reply::ping(format!("failed to look up {user}, sorry!"))];
            }
        };

        let primary = ctx
            .groups
            .by_gid(attrs.gid_number)
            .map_or_else(|| attrs.gid_number.to_string(), |g| g.name.clone());
        let groups: Vec<String> = std::iter::once(primary.as_str())
            .chain(ctx.groups.supplementary_groups(user))
            .map(colored)
            .collect();
        let created = attrs
            .creation_time
            .map_or_else(|| "unknown".to_string(), |t| t.format("%Y-%m-%d").to_string());

        vec![Reply::plain(format!(
            "{user} ({uid}) | {cn} | created {created} | groups: {groups}",
            uid = attrs.uid_number,
            cn = attrs.cn,
            groups = groups.join(", "),
        ))]
    })
}

fn checkacct<'a>(ctx: &'a BotContext, inv: &'a Invocation) -> BoxFuture<'a, Vec<Reply>> {
    Box::pin(async move {
        if inv.first_arg().is_none() {
            return Vec::new();
        }
        let filter = search_filter(inv.args.split_whitespace());
        match ctx.directory.search_people(&filter, SEARCH_LIMIT).await {
            Ok(people) if people.is_empty() => vec![Reply::ping("no results found")],
            Ok(people) => {
                let mut found: Vec<String> = people
                    .iter()
                    .map(|p| format!("{} ({})", p.uid, p.cn))
                    .collect();
                found.sort();
                vec![Reply::ping(found.join(", "))]
            }
            Err(e) => {
                error!(filter = %filter, error = %e, "People search failed");
                vec![Reply::ping("search failed, sorry!")]
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const GROUPS: &str = "\
# system groups
root:x:0:
ocf:x:1000:
ocfstaff:x:1002:alice,bob
sorry:*:1003:
opstaff:x:1004:alice
broken line
games:x:60:carol
";

    #[test]
    fn parses_group_file() {
        let db = GroupDatabase::parse(GROUPS);
        assert_eq!(db.by_gid(1000).unwrap().name, "ocf");
        assert_eq!(db.by_gid(1002).unwrap().members, vec!["alice", "bob"]);
        assert!(db.by_gid(4242).is_none());
        assert_eq!(db.supplementary_groups("alice"), vec!["ocfstaff", "opstaff"]);
        assert!(db.supplementary_groups("nobody").is_empty());
    }

    #[test]
    fn loads_group_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group");
        std::fs::write(&path, GROUPS).unwrap();
        let db = GroupDatabase::load(&path).unwrap();
        assert_eq!(db.by_gid(60).unwrap().members, vec!["carol"]);
    }

    #[test]
    fn known_groups_are_colored() {
        assert_eq!(colored("ocfroot"), "\x0307ocfroot\x0f");
        assert_eq!(colored("games"), "games\x0f");
    }

    #[test]
    fn search_filter_strips_keywords() {
        assert_eq!(alphanum("O'Brien-2"), "obrien");
        assert_eq!(
            search_filter(["Jane", "d*e"]),
            "(&(|(uid=*jane*)(cn=*jane*))(|(uid=*de*)(cn=*de*)))"
        );
    }
}

#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Integration tests for the built-in command table, dispatched against fake
//! collaborators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use ocfbot_core::Config;
use ocfbot_daemon::commands::accounts::{RequestError, RequestQueue};
use ocfbot_daemon::commands::check::{Directory, GroupDatabase, PersonEntry, UserAttrs};
use ocfbot_daemon::commands::lab::{LabSession, LabStats};
use ocfbot_daemon::commands::{ADMIN_REQUIRED, LookupError};
use ocfbot_daemon::{BotContext, CommandTable, IncomingMessage, Reply};

// =========================================================================
// Fakes
// =========================================================================

#[derive(Default)]
struct FakeQueue {
    pending: Vec<String>,
    /// How long `pending_requests` takes to answer.
    delay: Duration,
    fail_submit: bool,
    submitted: Mutex<Vec<(&'static str, String)>>,
}

impl FakeQueue {
    fn record(&self, action: &'static str, user: &str) -> Result<(), RequestError> {
        if self.fail_submit {
            return Err(RequestError::Submit("broker unreachable".into()));
        }
        self.submitted
            .lock()
            .unwrap()
            .push((action, user.to_string()));
        Ok(())
    }
}

#[async_trait]
impl RequestQueue for FakeQueue {
    async fn approve(&self, user_name: &str) -> Result<(), RequestError> {
        self.record("approve", user_name)
    }

    async fn reject(&self, user_name: &str) -> Result<(), RequestError> {
        self.record("reject", user_name)
    }

    async fn pending_requests(&self) -> Result<Vec<String>, RequestError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.pending.clone())
    }
}

#[derive(Default)]
struct FakeDirectory {
    filters: Mutex<Vec<(String, usize)>>,
    people: Vec<PersonEntry>,
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn user_attrs(&self, user: &str) -> Result<Option<UserAttrs>, LookupError> {
        Ok(match user {
            "alice" => Some(UserAttrs {
                uid_number: 31_337,
                gid_number: 1000,
                cn: "Alice Liddell".to_string(),
                creation_time: Some(Utc.with_ymd_and_hms(2014, 8, 22, 17, 3, 0).unwrap()),
            }),
            "olduser" => Some(UserAttrs {
                uid_number: 1_234,
                gid_number: 20,
                cn: "Old User".to_string(),
                creation_time: None,
            }),
            _ => None,
        })
    }

    async fn search_people(
        &self,
        filter: &str,
        size_limit: usize,
    ) -> Result<Vec<PersonEntry>, LookupError> {
        self.filters
            .lock()
            .unwrap()
            .push((filter.to_string(), size_limit));
        Ok(self.people.clone())
    }
}

struct FakeLab {
    staff: Vec<&'static str>,
    total: u32,
}

#[async_trait]
impl LabStats for FakeLab {
    async fn staff_in_lab(&self) -> Result<Vec<LabSession>, LookupError> {
        Ok(self
            .staff
            .iter()
            .enumerate()
            .map(|(i, user)| LabSession {
                user: (*user).to_string(),
                host: format!("desktop{i}"),
            })
            .collect())
    }

    async fn users_in_lab_count(&self) -> Result<u32, LookupError> {
        Ok(self.total)
    }
}

const GROUPS: &str = "\
ocf:x:1000:
ocfstaff:x:1002:alice,bob
ocfroot:x:1003:alice
";

struct Bot {
    table: CommandTable,
    ctx: BotContext,
    queue: Arc<FakeQueue>,
    directory: Arc<FakeDirectory>,
}

fn bot_with(queue: FakeQueue, directory: FakeDirectory, lab: FakeLab) -> Bot {
    let mut config = Config::default();
    config.commands.admins = vec!["ckuehl".to_string()];
    let queue = Arc::new(queue);
    let directory = Arc::new(directory);
    let ctx = BotContext::new(
        config,
        queue.clone(),
        directory.clone(),
        GroupDatabase::parse(GROUPS),
        Arc::new(lab),
    );
    Bot {
        table: CommandTable::with_builtins(".").unwrap(),
        ctx,
        queue,
        directory,
    }
}

fn bot(queue: FakeQueue) -> Bot {
    bot_with(
        queue,
        FakeDirectory::default(),
        FakeLab {
            staff: vec![],
            total: 0,
        },
    )
}

impl Bot {
    async fn say(&self, nick: &str, text: &str) -> Vec<Reply> {
        self.table
            .dispatch(&self.ctx, &IncomingMessage::new(nick, "#ocf", text))
            .await
    }
}

// =========================================================================
// approve / reject / list
// =========================================================================

#[tokio::test]
async fn approve_enqueues_and_acknowledges() {
    let bot = bot(FakeQueue::default());
    let replies = bot.say("ckuehl", ".approve alice").await;
    assert_eq!(
        replies,
        vec![Reply::ping("approved alice, the account is being created")]
    );
    assert_eq!(
        *bot.queue.submitted.lock().unwrap(),
        vec![("approve", "alice".to_string())]
    );
}

#[tokio::test]
async fn reject_enqueues_and_acknowledges() {
    let bot = bot(FakeQueue::default());
    let replies = bot.say("CKUEHL", ".reject mallory").await;
    assert_eq!(
        replies,
        vec![Reply::ping("rejected mallory, better luck next time")]
    );
    assert_eq!(
        *bot.queue.submitted.lock().unwrap(),
        vec![("reject", "mallory".to_string())]
    );
}

#[tokio::test]
async fn non_admin_is_refused() {
    let bot = bot(FakeQueue::default());
    for line in [".approve alice", ".reject alice", ".list"] {
        assert_eq!(bot.say("mallory", line).await, vec![Reply::ping(ADMIN_REQUIRED)]);
    }
    assert!(bot.queue.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_name_does_not_enqueue() {
    let bot = bot(FakeQueue::default());
    let replies = bot.say("ckuehl", ".approve").await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].text.starts_with("usage:"));
    assert!(bot.queue.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn enqueue_failure_is_reported() {
    let bot = bot(FakeQueue {
        fail_submit: true,
        ..FakeQueue::default()
    });
    assert_eq!(
        bot.say("ckuehl", ".approve alice").await,
        vec![Reply::ping("failed to queue request for alice, try again later")]
    );
}

#[tokio::test(start_paused = true)]
async fn list_times_out_after_five_seconds() {
    let bot = bot(FakeQueue {
        pending: vec!["alice".into()],
        delay: Duration::from_secs(30),
        ..FakeQueue::default()
    });

    let started = tokio::time::Instant::now();
    let replies = bot.say("ckuehl", ".list").await;
    assert_eq!(
        replies,
        vec![Reply::ping("timed out loading list of requests, sorry!")]
    );
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn list_reports_empty_queue() {
    let bot = bot(FakeQueue {
        delay: Duration::from_secs(1),
        ..FakeQueue::default()
    });
    assert_eq!(
        bot.say("ckuehl", ".list").await,
        vec![Reply::ping("no pending requests")]
    );
}

#[tokio::test(start_paused = true)]
async fn list_replies_once_per_request_in_order() {
    let bot = bot(FakeQueue {
        pending: vec!["alice".into(), "bob".into()],
        delay: Duration::from_secs(4),
        ..FakeQueue::default()
    });
    assert_eq!(
        bot.say("ckuehl", ".list").await,
        vec![Reply::ping("alice"), Reply::ping("bob")]
    );
}

// =========================================================================
// check / checkacct
// =========================================================================

#[tokio::test]
async fn check_reports_user_and_colored_groups() {
    let bot = bot(FakeQueue::default());
    let replies = bot.say("anyone", ".check alice").await;
    assert_eq!(
        replies,
        vec![Reply::plain(
            "alice (31337) | Alice Liddell | created 2014-08-22 | groups: \
             \x0314ocf\x0f, \x0307ocfroot\x0f, \x0302ocfstaff\x0f"
        )]
    );
}

#[tokio::test]
async fn check_handles_unknown_creation_and_primary_group() {
    let bot = bot(FakeQueue::default());
    let replies = bot.say("anyone", ".check olduser").await;
    assert_eq!(
        replies,
        vec![Reply::plain(
            "olduser (1234) | Old User | created unknown | groups: 20\x0f"
        )]
    );
}

#[tokio::test]
async fn check_missing_user() {
    let bot = bot(FakeQueue::default());
    assert_eq!(
        bot.say("anyone", ".check nobody").await,
        vec![Reply::plain("nobody does not exist")]
    );
}

#[tokio::test]
async fn checkacct_searches_and_sorts() {
    let directory = FakeDirectory {
        people: vec![
            PersonEntry {
                uid: "zjane".into(),
                cn: "Jane Z".into(),
            },
            PersonEntry {
                uid: "ajane".into(),
                cn: "Jane A".into(),
            },
        ],
        ..FakeDirectory::default()
    };
    let bot = bot_with(
        FakeQueue::default(),
        directory,
        FakeLab {
            staff: vec![],
            total: 0,
        },
    );

    assert_eq!(
        bot.say("anyone", ".checkacct Jane").await,
        vec![Reply::ping("ajane (Jane A), zjane (Jane Z)")]
    );
    assert_eq!(
        *bot.directory.filters.lock().unwrap(),
        vec![("(&(|(uid=*jane*)(cn=*jane*)))".to_string(), 5)]
    );

    assert!(bot.say("anyone", ".checkacct").await.is_empty());
}

#[tokio::test]
async fn checkacct_without_results() {
    let bot = bot(FakeQueue::default());
    assert_eq!(
        bot.say("anyone", ".checkacct nobody here").await,
        vec![Reply::ping("no results found")]
    );
}

// =========================================================================
// lab rules
// =========================================================================

fn lab_bot(staff: Vec<&'static str>, total: u32) -> Bot {
    bot_with(
        FakeQueue::default(),
        FakeDirectory::default(),
        FakeLab { staff, total },
    )
}

#[tokio::test]
async fn is_user_in_the_lab() {
    let bot = lab_bot(vec!["bob"], 3);
    assert_eq!(
        bot.say("anyone", "is bob in the lab?").await,
        vec![Reply::ping("bob is in the lab")]
    );
    assert_eq!(
        bot.say("anyone", "is carol in the lab").await,
        vec![Reply::ping("carol is not in the lab")]
    );
}

#[tokio::test]
async fn who_is_in_the_lab() {
    let bot = lab_bot(vec!["bob", "amy", "bob"], 7);
    let expected = vec![Reply::ping(
        "there are 7 people in the lab, including 2 staff: a\u{2060}my, b\u{2060}ob",
    )];
    assert_eq!(bot.say("anyone", "who's in the lab").await, expected);
    assert_eq!(bot.say("anyone", "who is in the lab").await, expected);
    assert_eq!(bot.say("anyone", "wiiitl").await, expected);
}

#[tokio::test]
async fn unrelated_chatter_is_ignored() {
    let bot = lab_bot(vec![], 1);
    assert!(bot.say("anyone", "hello world").await.is_empty());
    assert!(bot.say("anyone", "so who is in the lab").await.is_empty());
}

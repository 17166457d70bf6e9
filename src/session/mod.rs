//! Copilot sessions: fetching their metadata and event timelines, and holding the latest fetch in memory.
//!
//! See: [`fetch_sessions`], [`SessionStore`]

#![cfg(feature = "sessions")]

use std::{cmp::Reverse, collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub mod export;
pub mod rpc;

/// The metadata of a session, as reported by the session RPC. Carries at least `sessionId` and `startTime`.
pub type SessionMetadata = Map<String, Value>;

/// The metadata of a session merged with its `events` timeline.
pub type SessionRecord = Map<String, Value>;

/// The metadata key holding the session identifier.
pub const SESSION_ID_KEY: &str = "sessionId";

/// The metadata key holding the session start timestamp.
pub const START_TIME_KEY: &str = "startTime";

/// The record key holding the event timeline.
pub const EVENTS_KEY: &str = "events";

/// A connected session RPC peer.
pub trait SessionRpc: Send {
    /// Lists every session, in whatever order the peer reports them.
    fn list_sessions(&mut self) -> BoxFuture<'_, Result<Vec<SessionMetadata>>>;

    /// Resumes a session and fetches its full event timeline.
    fn session_events<'a>(&'a mut self, session_id: &'a str) -> BoxFuture<'a, Result<Vec<Value>>>;

    /// Releases the peer.
    fn stop(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Opens [`SessionRpc`] connections.
pub trait SessionBackend: Send + Sync {
    /// Connects with a token, or with the local login when the token is [`None`].
    fn connect<'a>(&'a self, token: Option<&'a str>) -> BoxFuture<'a, Result<Box<dyn SessionRpc>>>;
}

/// The session list of one fetch and the records of the sessions it selected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    /// Session metadata, newest first.
    pub sessions: Vec<SessionMetadata>,
    /// Records keyed by session identifier.
    pub records: HashMap<String, SessionRecord>,
}

/// Returns the identifier of a session, if it has a non-empty one.
pub fn session_id(session: &SessionMetadata) -> Option<&str> {
    session
        .get(SESSION_ID_KEY)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

fn start_time(session: &SessionMetadata) -> &str {
    session
        .get(START_TIME_KEY)
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Sorts sessions newest first. The sort is stable and sessions without a start time go last.
pub fn sort_newest_first(sessions: &mut [SessionMetadata]) {
    sessions.sort_by(|a, b| Reverse(start_time(a)).cmp(&Reverse(start_time(b))));
}

/// Keeps the first `limit` sessions unless `all` is set. A `limit` of zero keeps everything.
pub fn select(mut sessions: Vec<SessionMetadata>, limit: usize, all: bool) -> Vec<SessionMetadata> {
    if !all && limit > 0 {
        sessions.truncate(limit);
    }
    sessions
}

/// Lists every session, newest first.
///
/// # Errors
///
/// Returns an error if the listing call fails.
pub async fn list_sessions(rpc: &mut dyn SessionRpc) -> Result<Vec<SessionMetadata>> {
    let mut sessions = rpc.list_sessions().await?;
    sort_newest_first(&mut sessions);
    info!("listed {} sessions", sessions.len());
    Ok(sessions)
}

/// Lists sessions, selects the newest ones and fetches their event timelines one at a time.
///
/// A session whose events fail to fetch gets an empty timeline. Sessions without an identifier are kept in
/// the list but get no record.
///
/// # Errors
///
/// Returns an error if the listing call fails.
pub async fn collect_sessions(
    rpc: &mut dyn SessionRpc,
    limit: usize,
    all: bool,
) -> Result<SessionSnapshot> {
    let sessions = select(list_sessions(rpc).await?, limit, all);
    let mut records = HashMap::with_capacity(sessions.len());

    for (index, session) in sessions.iter().enumerate() {
        let Some(id) = session_id(session) else {
            debug!("skipping session #{index} without an identifier");
            continue;
        };

        debug!("[{}/{}] fetching events for {id}…", index + 1, sessions.len());
        let events = match rpc.session_events(id).await {
            Ok(events) => events,
            Err(err) => {
                warn!("could not fetch events for {id}: {err}");
                Vec::new()
            }
        };

        let mut record = session.clone();
        record.insert(EVENTS_KEY.to_owned(), Value::Array(events));
        records.insert(id.to_owned(), record);
    }

    info!(
        "collected {} sessions with {} records",
        sessions.len(),
        records.len()
    );
    Ok(SessionSnapshot { sessions, records })
}

/// Connects with `token`, collects sessions and always stops the connection afterwards.
///
/// The token is required: the local login is never used here.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for a blank token, or an error if connecting or listing fails.
pub async fn fetch_sessions(
    backend: &dyn SessionBackend,
    token: &str,
    limit: usize,
    all: bool,
) -> Result<SessionSnapshot> {
    if token.trim().is_empty() {
        return Err(Error::InvalidInput(String::from("Token cannot be empty")));
    }

    let mut rpc = backend.connect(Some(token)).await?;
    let snapshot = collect_sessions(rpc.as_mut(), limit, all).await;

    if let Err(err) = rpc.stop().await {
        warn!("failed to stop the session RPC: {err}");
    }

    snapshot
}

/// Holds the latest [`SessionSnapshot`] in memory.
///
/// The list and the records are always swapped together, so readers never see one fetch's list with
/// another fetch's records.
#[derive(Debug, Default)]
pub struct SessionStore {
    snapshot: RwLock<Arc<SessionSnapshot>>,
}

impl SessionStore {
    /// Creates an empty [`SessionStore`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces both the list and the records with those of `snapshot`.
    pub fn replace(&self, snapshot: SessionSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Returns the stored session list.
    pub fn sessions(&self) -> Vec<SessionMetadata> {
        self.snapshot().sessions.clone()
    }

    /// Returns the stored record of a session.
    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.snapshot().records.get(session_id).cloned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::{
        collections::HashSet,
        sync::atomic::{AtomicBool, Ordering},
    };

    use serde_json::json;

    pub(crate) fn session(id: Option<&str>, start: Option<&str>) -> SessionMetadata {
        let mut session = Map::new();
        if let Some(id) = id {
            session.insert(SESSION_ID_KEY.to_owned(), json!(id));
        }
        if let Some(start) = start {
            session.insert(START_TIME_KEY.to_owned(), json!(start));
        }
        session
    }

    /// Serves canned sessions; events fail for ids in `failing`, listing fails if `listing_fails`.
    #[derive(Debug, Default)]
    pub(crate) struct FakeRpc {
        pub(crate) sessions: Vec<SessionMetadata>,
        pub(crate) failing: HashSet<String>,
        pub(crate) listing_fails: bool,
        pub(crate) requested: Vec<String>,
        pub(crate) stopped: Arc<AtomicBool>,
    }

    impl SessionRpc for FakeRpc {
        fn list_sessions(&mut self) -> BoxFuture<'_, Result<Vec<SessionMetadata>>> {
            Box::pin(async move {
                if self.listing_fails {
                    Err(Error::Rpc(String::from("session.list: not authenticated")))
                } else {
                    Ok(self.sessions.clone())
                }
            })
        }

        fn session_events<'a>(
            &'a mut self,
            session_id: &'a str,
        ) -> BoxFuture<'a, Result<Vec<Value>>> {
            Box::pin(async move {
                self.requested.push(session_id.to_owned());
                if self.failing.contains(session_id) {
                    Err(Error::Rpc(format!("session {session_id} is gone")))
                } else {
                    Ok(vec![json!({ "type": "user.message", "session": session_id })])
                }
            })
        }

        fn stop(&mut self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.stopped.store(true, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[test]
    fn sessions_sort_newest_first_and_stably() {
        let mut sessions = vec![
            session(Some("old"), Some("2026-01-01T00:00:00Z")),
            session(Some("undated-1"), None),
            session(Some("new"), Some("2026-03-01T00:00:00Z")),
            session(Some("undated-2"), None),
            session(Some("tie-1"), Some("2026-02-01T00:00:00Z")),
            session(Some("tie-2"), Some("2026-02-01T00:00:00Z")),
        ];
        sort_newest_first(&mut sessions);

        let order: Vec<_> = sessions.iter().filter_map(session_id).collect();
        assert_eq!(
            order,
            vec!["new", "tie-1", "tie-2", "old", "undated-1", "undated-2"]
        );
    }

    #[test]
    fn selection_honours_limit_and_all() {
        let sessions: Vec<_> = (0..5).map(|i| session(Some(&i.to_string()), None)).collect();
        assert_eq!(select(sessions.clone(), 2, false).len(), 2);
        assert_eq!(select(sessions.clone(), 2, true).len(), 5);
        assert_eq!(select(sessions.clone(), 0, false).len(), 5);
        assert_eq!(select(sessions, 50, false).len(), 5);
    }

    #[tokio::test]
    async fn sessions_without_ids_are_listed_but_not_recorded() {
        let mut rpc = FakeRpc {
            sessions: vec![
                session(Some("a"), Some("2026-03-02")),
                session(None, Some("2026-03-03")),
                session(Some(""), Some("2026-03-01")),
            ],
            ..FakeRpc::default()
        };

        let snapshot = collect_sessions(&mut rpc, 50, false).await.unwrap();
        assert_eq!(snapshot.sessions.len(), 3);
        assert_eq!(snapshot.records.len(), 1);
        assert!(snapshot.records.contains_key("a"));
        assert_eq!(rpc.requested, vec![String::from("a")]);
    }

    #[tokio::test]
    async fn failing_events_only_affect_their_session() {
        let mut rpc = FakeRpc {
            sessions: vec![
                session(Some("a"), Some("2026-03-03")),
                session(Some("b"), Some("2026-03-02")),
                session(Some("c"), Some("2026-03-01")),
            ],
            failing: HashSet::from([String::from("b")]),
            ..FakeRpc::default()
        };

        let snapshot = collect_sessions(&mut rpc, 50, false).await.unwrap();
        assert_eq!(snapshot.records["b"][EVENTS_KEY], json!([]));
        assert_eq!(snapshot.records["a"][EVENTS_KEY].as_array().unwrap().len(), 1);
        assert_eq!(snapshot.records["c"][EVENTS_KEY].as_array().unwrap().len(), 1);
        assert_eq!(snapshot.records["c"][START_TIME_KEY], "2026-03-01");
        assert_eq!(rpc.requested, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn excluded_sessions_get_no_records() {
        let mut rpc = FakeRpc {
            sessions: vec![
                session(Some("older"), Some("2026-01-01")),
                session(Some("newest"), Some("2026-03-01")),
                session(Some("middle"), Some("2026-02-01")),
            ],
            ..FakeRpc::default()
        };

        let snapshot = collect_sessions(&mut rpc, 2, false).await.unwrap();
        let listed: Vec<_> = snapshot.sessions.iter().filter_map(session_id).collect();
        assert_eq!(listed, vec!["newest", "middle"]);
        assert!(!snapshot.records.contains_key("older"));
        assert_eq!(rpc.requested, vec!["newest", "middle"]);
    }

    #[derive(Default)]
    struct FakeBackend {
        sessions: Vec<SessionMetadata>,
        listing_fails: bool,
        stopped: Arc<AtomicBool>,
    }

    impl SessionBackend for FakeBackend {
        fn connect<'a>(
            &'a self,
            token: Option<&'a str>,
        ) -> BoxFuture<'a, Result<Box<dyn SessionRpc>>> {
            Box::pin(async move {
                match token {
                    Some("bad") => Err(Error::Auth(String::from("rejected"))),
                    _ => Ok(Box::new(FakeRpc {
                        sessions: self.sessions.clone(),
                        listing_fails: self.listing_fails,
                        stopped: Arc::clone(&self.stopped),
                        ..FakeRpc::default()
                    }) as Box<dyn SessionRpc>),
                }
            })
        }
    }

    #[tokio::test]
    async fn fetch_connects_with_the_token() {
        let backend = FakeBackend {
            sessions: vec![session(Some("a"), None)],
            ..FakeBackend::default()
        };

        let snapshot = fetch_sessions(&backend, "gho_ok", 50, false).await.unwrap();
        assert_eq!(snapshot.records.len(), 1);
        assert!(backend.stopped.load(Ordering::SeqCst));

        let err = fetch_sessions(&backend, "bad", 50, false).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn blank_tokens_never_connect() {
        let backend = FakeBackend::default();

        let err = fetch_sessions(&backend, " \n", 50, false).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!backend.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_listings_still_stop_the_client() {
        let backend = FakeBackend {
            sessions: vec![session(Some("a"), None)],
            listing_fails: true,
            ..FakeBackend::default()
        };

        let err = fetch_sessions(&backend, "gho_ok", 50, false).await.unwrap_err();
        assert!(matches!(err, Error::Rpc(_)));
        assert!(backend.stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn store_swaps_list_and_records_together() {
        let store = SessionStore::new();
        assert!(store.sessions().is_empty());
        assert_eq!(store.get("a"), None);

        let mut record = session(Some("a"), None);
        record.insert(EVENTS_KEY.to_owned(), json!([]));
        store.replace(SessionSnapshot {
            sessions: vec![session(Some("a"), None)],
            records: HashMap::from([(String::from("a"), record.clone())]),
        });
        let before = store.snapshot();

        store.replace(SessionSnapshot {
            sessions: vec![session(Some("b"), None)],
            records: HashMap::new(),
        });

        assert_eq!(before.records.get("a"), Some(&record));
        assert_eq!(store.get("a"), None);
        assert_eq!(store.sessions().len(), 1);
        assert_eq!(session_id(&store.sessions()[0]), Some("b"));
    }
}

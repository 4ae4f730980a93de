//! Correlation index: which live message belongs to an execution.
//!
//! Lookups try the process-local cache first. On a miss, the channel's
//! recent history is scanned for a message from our own poster whose footer
//! records the execution id. The index is shared, so every map sits behind a
//! mutex, and [`CorrelationIndex::lock`] hands out one guard per execution
//! id so only one event at a time can create or update its document.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use jiff::{SignedDuration, Timestamp};

use crate::model::{Document, ExecutionInfo, Message, footer_execution_id};
use crate::transport::{Result, Transport, TransportError, Window};

/// How far back the history scan looks.
pub const DEFAULT_LOOKBACK: SignedDuration = SignedDuration::from_mins(30);

/// Most messages the history scan reads.
pub const DEFAULT_HISTORY_LIMIT: usize = 200;

/// Who we are on the platform, and where we post.
#[derive(Debug, Clone)]
pub struct Scope {
    pub channel: String,
    pub poster: String,
    pub lookback: SignedDuration,
    pub history_limit: usize,
}

/// Execution → message cache plus channel and user identity caches.
#[derive(Default)]
pub struct CorrelationIndex {
    messages: Mutex<HashMap<String, Message>>,
    channels: Mutex<HashMap<String, String>>,
    users: Mutex<HashMap<String, String>>,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Held while an event for one execution is being processed.
///
/// Dropping the last guard for an execution removes its lock from the
/// index.
pub struct ExecutionGuard<'a> {
    index: &'a CorrelationIndex,
    execution_id: String,
    lock: Arc<Mutex<()>>,
}

impl ExecutionGuard<'_> {
    /// Blocks until no other holder for the same execution remains.
    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        let mut writers = guard(&self.index.writers);
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            writers.remove(&self.execution_id);
        }
    }
}

impl CorrelationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The per-execution writer lock.
    pub fn lock(&self, execution_id: &str) -> ExecutionGuard<'_> {
        let mut writers = guard(&self.writers);
        let lock = writers
            .entry(execution_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        ExecutionGuard {
            index: self,
            execution_id: execution_id.to_string(),
            lock,
        }
    }

    /// Cached message for an execution.
    pub fn get(&self, execution_id: &str) -> Option<Message> {
        guard(&self.messages).get(execution_id).cloned()
    }

    /// Caches a published document under its execution id.
    ///
    /// Documents that were never published have no message to cache.
    pub fn put(&self, document: &Document) {
        let Some(ts) = document.message_id() else {
            return;
        };
        let message = Message {
            ts: ts.to_string(),
            user: None,
            blocks: document.blocks().to_vec(),
        };
        guard(&self.messages).insert(document.execution().execution_id.clone(), message);
    }

    /// Finds the live document for an execution, or `None` if it has none yet.
    pub fn resolve(
        &self,
        execution: &ExecutionInfo,
        transport: &dyn Transport,
        scope: &Scope,
        now: Timestamp,
    ) -> Result<Option<Document>> {
        let id = &execution.execution_id;
        if let Some(message) = self.get(id) {
            tracing::debug!(execution_id = %id, ts = %message.ts, "correlation cache hit");
            return Ok(Some(Document::from_message(execution.clone(), message)));
        }

        let Some(message) = self.scan(id, transport, scope, now)? else {
            tracing::debug!(execution_id = %id, "no live document");
            return Ok(None);
        };

        tracing::info!(execution_id = %id, ts = %message.ts, "recovered document from history");
        guard(&self.messages).insert(id.clone(), message.clone());
        Ok(Some(Document::from_message(execution.clone(), message)))
    }

    /// Channel id for a channel name. A missing channel is an error: there
    /// is nowhere to post.
    pub fn channel_id(&self, name: &str, transport: &dyn Transport) -> Result<String> {
        if let Some(id) = guard(&self.channels).get(name) {
            return Ok(id.clone());
        }
        let id = transport
            .find_channel(name)?
            .ok_or_else(|| TransportError::ChannelNotFound(name.to_string()))?;
        guard(&self.channels).insert(name.to_string(), id.clone());
        Ok(id)
    }

    /// User id for a user name, if the platform knows the name.
    pub fn user_id(&self, name: &str, transport: &dyn Transport) -> Result<Option<String>> {
        if let Some(id) = guard(&self.users).get(name) {
            return Ok(Some(id.clone()));
        }
        let id = transport.find_user(name)?;
        if let Some(id) = &id {
            guard(&self.users).insert(name.to_string(), id.clone());
        }
        Ok(id)
    }

    /// Scans recent history for our message carrying this execution id.
    fn scan(
        &self,
        execution_id: &str,
        transport: &dyn Transport,
        scope: &Scope,
        now: Timestamp,
    ) -> Result<Option<Message>> {
        let channel = self.channel_id(&scope.channel, transport)?;
        let window = Window::ending_at(now, scope.lookback, scope.history_limit);
        let history = transport.history(&channel, window)?;

        for message in history {
            if !self.is_own(&message, transport, &scope.poster)? {
                continue;
            }
            if footer_execution_id(&message.blocks) == Some(execution_id) {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    /// Whether a message was posted by `poster`. The poster's user id is
    /// learned from the first of its messages seen and cached by name.
    fn is_own(&self, message: &Message, transport: &dyn Transport, poster: &str) -> Result<bool> {
        let Some(user) = message.user.as_deref() else {
            return Ok(false);
        };
        if let Some(id) = guard(&self.users).get(poster) {
            return Ok(id == user);
        }

        if transport.user_name(user)?.as_deref() == Some(poster) {
            guard(&self.users).insert(poster.to_string(), user.to_string());
            return Ok(true);
        }
        Ok(false)
    }
}

/// Locks a cache map. A panic mid-insert can't leave a `HashMap` invalid,
/// so poisoning is ignored.
fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    use tempfile::TempDir;

    use crate::model::{BlockName, Content};
    use crate::storage::ChannelStore;

    fn setup() -> (TempDir, ChannelStore, String, Scope) {
        let dir = TempDir::new().unwrap();
        let store = ChannelStore::open(dir.path().join("channel.sqlite"), "BuildBot").unwrap();
        let channel = store.ensure_channel("deployments").unwrap();
        let scope = Scope {
            channel: "deployments".into(),
            poster: "BuildBot".into(),
            lookback: DEFAULT_LOOKBACK,
            history_limit: DEFAULT_HISTORY_LIMIT,
        };
        (dir, store, channel, scope)
    }

    fn rendered(execution_id: &str) -> Document {
        let mut doc = Document::new(ExecutionInfo::new("app-pipeline", execution_id), "*app*");
        doc.find_or_create(BlockName::Status, Content::Text(">:loading: Started".into()));
        doc.render();
        doc
    }

    fn post_as(
        store: &ChannelStore,
        channel: &str,
        member: &str,
        execution_id: &str,
        at: Timestamp,
    ) -> Message {
        store
            .insert_message(channel, member, None, None, rendered(execution_id).blocks(), at)
            .unwrap()
    }

    #[test]
    fn miss_on_empty_channel() {
        let (_dir, store, _channel, scope) = setup();
        let index = CorrelationIndex::new();

        let found = index
            .resolve(&ExecutionInfo::new("app", "exec-1"), &store, &scope, Timestamp::now())
            .unwrap();

        assert!(found.is_none());
    }

    #[test]
    fn recovers_document_from_history_and_caches_it() {
        let (_dir, store, channel, scope) = setup();
        let now = Timestamp::now();
        let poster = store.poster_id().to_string();
        post_as(&store, &channel, &poster, "exec-0", now - SignedDuration::from_mins(2));
        let ours = post_as(&store, &channel, &poster, "exec-1", now - SignedDuration::from_mins(5));
        let index = CorrelationIndex::new();
        let execution = ExecutionInfo::new("app-pipeline", "exec-1");

        let doc = index.resolve(&execution, &store, &scope, now).unwrap().unwrap();

        assert_eq!(doc.message_id(), Some(ours.ts.as_str()));
        assert_eq!(doc.footer_execution_id(), Some("exec-1"));
        assert_eq!(index.get("exec-1").map(|m| m.ts), Some(ours.ts));
    }

    #[test]
    fn ignores_other_posters() {
        let (_dir, store, channel, scope) = setup();
        let now = Timestamp::now();
        let human = store.ensure_user("alice").unwrap();
        post_as(&store, &channel, &human, "exec-1", now - SignedDuration::from_mins(1));
        let index = CorrelationIndex::new();

        let found = index
            .resolve(&ExecutionInfo::new("app", "exec-1"), &store, &scope, now)
            .unwrap();

        assert!(found.is_none());
    }

    #[test]
    fn ignores_messages_outside_the_window() {
        let (_dir, store, channel, scope) = setup();
        let now = Timestamp::now();
        let poster = store.poster_id().to_string();
        post_as(&store, &channel, &poster, "exec-1", now - SignedDuration::from_mins(31));
        let index = CorrelationIndex::new();

        let found = index
            .resolve(&ExecutionInfo::new("app", "exec-1"), &store, &scope, now)
            .unwrap();

        assert!(found.is_none());
    }

    #[test]
    fn cache_answers_without_scanning() {
        let (_dir, store, _channel, scope) = setup();
        let index = CorrelationIndex::new();
        let mut doc = rendered("exec-9");
        doc.set_message_id("42.000001");
        index.put(&doc);

        let found = index
            .resolve(doc.execution(), &store, &scope, Timestamp::now())
            .unwrap()
            .unwrap();

        assert_eq!(found.message_id(), Some("42.000001"));
        assert_eq!(found.blocks(), doc.blocks());
    }

    #[test]
    fn unpublished_documents_are_not_cached() {
        let index = CorrelationIndex::new();
        index.put(&rendered("exec-1"));

        assert!(index.get("exec-1").is_none());
    }

    #[test]
    fn missing_channel_is_an_error() {
        let (_dir, store, _channel, mut scope) = setup();
        scope.channel = "nowhere".into();
        let index = CorrelationIndex::new();

        let err = index
            .resolve(&ExecutionInfo::new("app", "exec-1"), &store, &scope, Timestamp::now())
            .unwrap_err();

        assert!(matches!(err, TransportError::ChannelNotFound(name) if name == "nowhere"));
    }

    #[test]
    fn identity_lookups_are_cached() {
        let (_dir, store, channel, _scope) = setup();
        let index = CorrelationIndex::new();
        let alice = store.ensure_user("alice").unwrap();

        assert_eq!(index.channel_id("deployments", &store).unwrap(), channel);
        assert_eq!(index.user_id("alice", &store).unwrap(), Some(alice.clone()));
        assert_eq!(index.user_id("bob", &store).unwrap(), None);
        assert_eq!(guard(&index.users).get("alice"), Some(&alice));
    }

    #[test]
    fn execution_lock_is_shared_per_id() {
        let index = Arc::new(CorrelationIndex::new());
        let counter = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let index = Arc::clone(&index);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    let writer = index.lock("exec-1");
                    let _held = writer.acquire();
                    counter.lock().unwrap().push(i);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.lock().unwrap().len(), 4);
        assert!(Arc::ptr_eq(&index.lock("a").lock, &index.lock("a").lock));
        assert!(!Arc::ptr_eq(&index.lock("a").lock, &index.lock("b").lock));
    }

    #[test]
    fn writer_locks_are_dropped_with_their_last_guard() {
        let index = CorrelationIndex::new();

        let first = index.lock("exec-1");
        let second = index.lock("exec-1");
        {
            let _held = first.acquire();
        }
        drop(first);
        assert_eq!(guard(&index.writers).len(), 1);

        drop(second);
        assert!(guard(&index.writers).is_empty());

        let again = index.lock("exec-1");
        assert_eq!(guard(&index.writers).len(), 1);
        drop(again);
        assert!(guard(&index.writers).is_empty());
    }
}

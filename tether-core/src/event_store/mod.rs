//! Append-only event store
//!
//! Each instance owns a gap-free sequence of typed events starting at 1.
//! Events are recorded for recall (replay and reconstruction), not to
//! trigger other components.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tether_core::event_store::{EventPayload, EventQuery, EventStore};
//!
//! let store = EventStore::new(db);
//! store.emit(&instance_id, &EventPayload::task_started("wire auth"), None)?;
//!
//! let state = store.replay(&instance_id, None)?;
//! println!("{} events, last task {:?}", state.events_applied, state.last_task);
//! ```

pub mod payload;
pub mod replay;

pub use payload::{EventCategory, EventKind, EventMetadata, EventPayload};
pub use replay::{ReplayState, TestMarker};

use crate::db::{Database, EventFilter, NewEventRow, StoredEvent, TypeAggregate};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Default page size for [`EventStore::query`]
pub const DEFAULT_QUERY_LIMIT: usize = 100;
/// Upper bound on a single page
pub const MAX_QUERY_LIMIT: usize = 1000;
/// Upper bound on an ancestry walk
pub const MAX_ANCESTRY: usize = 500;

/// A decoded event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub event_id: String,
    pub instance_id: String,
    /// Stored type string; matches `payload.event_type()`
    pub event_type: String,
    pub sequence_num: i64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
    /// Carries the effective `parent_event_id`
    pub metadata: EventMetadata,
}

impl Event {
    pub fn kind(&self) -> Option<EventKind> {
        self.payload.kind()
    }

    pub fn parent_event_id(&self) -> Option<&str> {
        self.metadata.parent_event_id.as_deref()
    }

    fn from_stored(row: StoredEvent) -> Self {
        let mut metadata: EventMetadata = row
            .metadata
            .and_then(|m| serde_json::from_value(m).ok())
            .unwrap_or_default();
        metadata.parent_event_id = row.parent_event_id;

        Self {
            payload: EventPayload::decode(&row.event_type, row.payload),
            event_id: row.event_id,
            instance_id: row.instance_id,
            event_type: row.event_type,
            sequence_num: row.sequence_num,
            timestamp: row.timestamp,
            metadata,
        }
    }
}

/// Receipt for an appended event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmittedEvent {
    pub event_id: String,
    pub sequence_num: i64,
    pub timestamp: DateTime<Utc>,
    pub parent_event_id: Option<String>,
}

/// Filters for [`EventStore::query`]
#[derive(Debug, Clone)]
pub struct EventQuery {
    /// Match any of these kinds (empty = all)
    pub types: Vec<EventKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub keyword: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            types: vec![],
            since: None,
            until: None,
            keyword: None,
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }
}

/// One page of query results
#[derive(Debug, Clone, Serialize)]
pub struct EventPage {
    pub events: Vec<Event>,
    /// Total matches regardless of paging
    pub total: i64,
    pub has_more: bool,
}

pub struct EventStore {
    db: Arc<Database>,
}

impl EventStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a typed event.
    pub fn emit(
        &self,
        instance_id: &str,
        payload: &EventPayload,
        metadata: Option<&EventMetadata>,
    ) -> Result<EmittedEvent> {
        self.emit_at(instance_id, payload, metadata, Utc::now())
    }

    pub fn emit_at(
        &self,
        instance_id: &str,
        payload: &EventPayload,
        metadata: Option<&EventMetadata>,
        now: DateTime<Utc>,
    ) -> Result<EmittedEvent> {
        if payload.kind().is_none() {
            return Err(Error::InvalidInput(format!(
                "cannot emit unrecognized event type '{}'",
                payload.event_type()
            )));
        }
        self.require_instance(instance_id)?;

        let data = payload
            .to_data()
            .map_err(|e| Error::InvalidInput(format!("payload is not serializable: {}", e)))?;
        let data = serde_json::to_string(&data)?;

        let explicit_parent = metadata.and_then(|m| m.parent_event_id.as_deref());
        if let Some(parent) = explicit_parent {
            match self.db.get_event(parent)? {
                Some(p) if p.instance_id == instance_id => {}
                Some(_) => {
                    return Err(Error::InvalidInput(format!(
                        "parent event {} belongs to another instance",
                        parent
                    )))
                }
                None => return Err(Error::EventNotFound(parent.to_string())),
            }
        }

        // The parent lives in its own column; keep the blob free of it.
        let metadata_json = metadata
            .map(|m| EventMetadata {
                parent_event_id: None,
                ..m.clone()
            })
            .filter(|m| !m.is_empty())
            .map(|m| serde_json::to_string(&m))
            .transpose()?;

        let event_id = uuid::Uuid::new_v4().to_string();
        let (sequence_num, parent_event_id) = self.db.insert_event_next_seq(&NewEventRow {
            event_id: &event_id,
            instance_id,
            event_type: payload.event_type(),
            timestamp: now,
            payload: &data,
            metadata: metadata_json.as_deref(),
            parent_event_id: explicit_parent,
        })?;

        tracing::debug!(
            instance_id,
            event_type = payload.event_type(),
            sequence_num,
            "Emitted event"
        );

        Ok(EmittedEvent {
            event_id,
            sequence_num,
            timestamp: now,
            parent_event_id,
        })
    }

    /// Append an event from an untyped source such as the CLI.
    ///
    /// The type must be a known kind and the body must be a JSON object
    /// matching that kind's shape.
    pub fn emit_raw(
        &self,
        instance_id: &str,
        event_type: &str,
        data: Value,
        metadata: Option<Value>,
    ) -> Result<EmittedEvent> {
        let kind: EventKind = event_type.parse().map_err(Error::InvalidInput)?;

        if !data.is_object() {
            return Err(Error::InvalidInput(format!(
                "{} payload must be a JSON object",
                kind
            )));
        }
        let payload = EventPayload::from_data(kind, data)
            .map_err(|e| Error::InvalidInput(format!("invalid {} payload: {}", kind, e)))?;

        let metadata = match metadata {
            None => None,
            Some(m) if m.is_object() => Some(
                serde_json::from_value::<EventMetadata>(m)
                    .map_err(|e| Error::InvalidInput(format!("invalid metadata: {}", e)))?,
            ),
            Some(_) => {
                return Err(Error::InvalidInput(
                    "metadata must be a JSON object".to_string(),
                ))
            }
        };

        self.emit(instance_id, &payload, metadata.as_ref())
    }

    /// Filtered page of events, ascending by sequence number.
    pub fn query(&self, instance_id: &str, query: &EventQuery) -> Result<EventPage> {
        self.require_instance(instance_id)?;

        let limit = match query.limit {
            0 => DEFAULT_QUERY_LIMIT,
            n => n.min(MAX_QUERY_LIMIT),
        };
        let filter = EventFilter {
            types: query.types.iter().map(|k| k.as_str().to_string()).collect(),
            since: query.since,
            until: query.until,
            keyword: query.keyword.clone(),
            limit,
            offset: query.offset,
        };

        let (rows, total) = self.db.query_events(instance_id, &filter)?;
        let has_more = (query.offset + rows.len()) < total as usize;

        Ok(EventPage {
            events: rows.into_iter().map(Event::from_stored).collect(),
            total,
            has_more,
        })
    }

    /// Fold events up to (and including) `up_to` into a [`ReplayState`].
    pub fn replay(&self, instance_id: &str, up_to: Option<i64>) -> Result<ReplayState> {
        self.require_instance(instance_id)?;
        let events: Vec<Event> = self
            .db
            .events_up_to(instance_id, up_to)?
            .into_iter()
            .map(Event::from_stored)
            .collect();
        Ok(ReplayState::replay(&events))
    }

    pub fn aggregate_by_type(&self, instance_id: &str) -> Result<Vec<TypeAggregate>> {
        self.require_instance(instance_id)?;
        self.db.aggregate_events_by_type(instance_id)
    }

    /// The newest `n` events, oldest first
    pub fn latest(&self, instance_id: &str, n: usize) -> Result<Vec<Event>> {
        self.require_instance(instance_id)?;
        Ok(self
            .db
            .latest_events(instance_id, n)?
            .into_iter()
            .map(Event::from_stored)
            .collect())
    }

    /// Newest event of one kind, regardless of where it sits in the chain
    pub fn latest_of_kind(&self, instance_id: &str, kind: EventKind) -> Result<Option<Event>> {
        self.require_instance(instance_id)?;
        Ok(self
            .db
            .latest_event_of_type(instance_id, kind.as_str())?
            .map(Event::from_stored))
    }

    pub fn get_by_id(&self, event_id: &str) -> Result<Event> {
        self.db
            .get_event(event_id)?
            .map(Event::from_stored)
            .ok_or_else(|| Error::EventNotFound(event_id.to_string()))
    }

    pub fn count(&self, instance_id: &str) -> Result<i64> {
        self.require_instance(instance_id)?;
        self.db.count_events(instance_id)
    }

    /// Walk `parent_event_id` links back from `event_id`.
    ///
    /// Returns at most `limit` events, oldest first, ending with `event_id`.
    /// A parent that does not exist is reported as [`Error::EventNotFound`].
    pub fn ancestry(&self, event_id: &str, limit: usize) -> Result<Vec<Event>> {
        let limit = limit.clamp(1, MAX_ANCESTRY);
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(event_id.to_string());

        while let Some(id) = next.take() {
            if chain.len() >= limit {
                break;
            }
            if !seen.insert(id.clone()) {
                return Err(Error::Internal(format!(
                    "event parent chain loops at {}",
                    id
                )));
            }
            let event = self.get_by_id(&id)?;
            next = event.metadata.parent_event_id.clone();
            chain.push(event);
        }

        chain.reverse();
        Ok(chain)
    }

    /// Destructive purge, for tests and cleanup tooling
    pub fn delete_for_instance(&self, instance_id: &str) -> Result<usize> {
        let deleted = self.db.delete_events(instance_id)?;
        tracing::info!(instance_id, deleted, "Purged events");
        Ok(deleted)
    }

    fn require_instance(&self, instance_id: &str) -> Result<()> {
        if self.db.instance_exists(instance_id)? {
            Ok(())
        } else {
            Err(Error::InstanceNotFound(instance_id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::payload::*;
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    const ID: &str = "demo-PS-abc123";

    fn setup() -> (EventStore, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        db.insert_instance(&crate::db::repo::tests::create_test_instance(
            ID,
            "demo",
            Utc::now(),
        ))
        .unwrap();
        (EventStore::new(Arc::clone(&db)), db)
    }

    #[test]
    fn test_sequence_is_gap_free_and_monotonic() {
        let (store, _db) = setup();
        let seqs: Vec<i64> = (0..25)
            .map(|i| {
                store
                    .emit(ID, &EventPayload::note(format!("n{}", i)), None)
                    .unwrap()
                    .sequence_num
            })
            .collect();
        assert_eq!(seqs, (1..=25).collect::<Vec<i64>>());
        assert_eq!(store.count(ID).unwrap(), 25);
    }

    #[test]
    fn test_parent_defaults_to_previous_event() {
        let (store, _db) = setup();
        let first = store.emit(ID, &EventPayload::note("a"), None).unwrap();
        let second = store.emit(ID, &EventPayload::note("b"), None).unwrap();

        assert_eq!(first.parent_event_id, None);
        assert_eq!(second.parent_event_id.as_deref(), Some(first.event_id.as_str()));

        let chain = store.ancestry(&second.event_id, 10).unwrap();
        let ids: Vec<&str> = chain.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec![first.event_id.as_str(), second.event_id.as_str()]);
    }

    #[test]
    fn test_emit_unknown_instance() {
        let (store, _db) = setup();
        let err = store
            .emit("ghost-PS-000000", &EventPayload::note("x"), None)
            .unwrap_err();
        assert!(matches!(err, Error::InstanceNotFound(_)));
    }

    #[test]
    fn test_emit_explicit_missing_parent() {
        let (store, _db) = setup();
        let err = store
            .emit(
                ID,
                &EventPayload::note("x"),
                Some(&EventMetadata::with_parent("nope")),
            )
            .unwrap_err();
        assert!(matches!(err, Error::EventNotFound(_)));
    }

    #[test]
    fn test_emit_raw_validation() {
        let (store, _db) = setup();

        let ok = store
            .emit_raw(
                ID,
                "task_started",
                json!({"name": "wire auth"}),
                Some(json!({"source": "cli"})),
            )
            .unwrap();
        assert_eq!(ok.sequence_num, 1);

        assert!(matches!(
            store.emit_raw(ID, "task_exploded", json!({}), None).unwrap_err(),
            Error::InvalidInput(_)
        ));
        assert!(matches!(
            store.emit_raw(ID, "note_added", json!("text"), None).unwrap_err(),
            Error::InvalidInput(_)
        ));
        assert!(matches!(
            store.emit_raw(ID, "task_started", json!({"epic_id": 1}), None).unwrap_err(),
            Error::InvalidInput(_)
        ));
        assert!(matches!(
            store
                .emit_raw(ID, "note_added", json!({"text": "x"}), Some(json!([1])))
                .unwrap_err(),
            Error::InvalidInput(_)
        ));

        let event = store.get_by_id(&ok.event_id).unwrap();
        assert_eq!(event.metadata.source.as_deref(), Some("cli"));
    }

    #[test]
    fn test_keyword_wildcards_match_literally() {
        let (store, _db) = setup();
        store.emit(ID, &EventPayload::note("rename a_b"), None).unwrap();
        store.emit(ID, &EventPayload::note("rename axb"), None).unwrap();
        store.emit(ID, &EventPayload::note("coverage 100%"), None).unwrap();

        let underscore = store
            .query(
                ID,
                &EventQuery {
                    keyword: Some("a_b".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(underscore.total, 1);
        assert_eq!(underscore.events[0].sequence_num, 1);

        let percent = store
            .query(
                ID,
                &EventQuery {
                    keyword: Some("%".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(percent.total, 1);
        assert_eq!(percent.events[0].sequence_num, 3);
    }

    #[test]
    fn test_latest_of_kind() {
        let (store, _db) = setup();
        assert!(store
            .latest_of_kind(ID, EventKind::TaskStarted)
            .unwrap()
            .is_none());

        store.emit(ID, &EventPayload::task_started("first"), None).unwrap();
        let second = store.emit(ID, &EventPayload::task_started("second"), None).unwrap();
        store.emit(ID, &EventPayload::note("later"), None).unwrap();

        let latest = store
            .latest_of_kind(ID, EventKind::TaskStarted)
            .unwrap()
            .unwrap();
        assert_eq!(latest.event_id, second.event_id);
    }

    #[test]
    fn test_query_filters_and_paging() {
        let (store, _db) = setup();
        let base = Utc::now();
        store
            .emit_at(ID, &EventPayload::task_started("alpha"), None, base)
            .unwrap();
        for i in 0..5 {
            store
                .emit_at(
                    ID,
                    &EventPayload::note(format!("note {}", i)),
                    None,
                    base + Duration::seconds(i + 1),
                )
                .unwrap();
        }

        let notes = store
            .query(
                ID,
                &EventQuery {
                    types: vec![EventKind::NoteAdded],
                    limit: 2,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(notes.total, 5);
        assert_eq!(notes.events.len(), 2);
        assert!(notes.has_more);
        assert!(notes.events[0].sequence_num < notes.events[1].sequence_num);

        let last_page = store
            .query(
                ID,
                &EventQuery {
                    types: vec![EventKind::NoteAdded],
                    limit: 2,
                    offset: 4,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(last_page.events.len(), 1);
        assert!(!last_page.has_more);

        let keyword = store
            .query(
                ID,
                &EventQuery {
                    keyword: Some("alpha".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(keyword.total, 1);
        assert_eq!(keyword.events[0].kind(), Some(EventKind::TaskStarted));

        let window = store
            .query(
                ID,
                &EventQuery {
                    since: Some(base + Duration::seconds(2)),
                    until: Some(base + Duration::seconds(3)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(window.total, 2);
    }

    #[test]
    fn test_replay_up_to() {
        let (store, _db) = setup();
        store
            .emit(ID, &EventPayload::task_started("first"), None)
            .unwrap();
        store
            .emit(ID, &EventPayload::task_started("second"), None)
            .unwrap();

        let partial = store.replay(ID, Some(1)).unwrap();
        assert_eq!(partial.last_task.unwrap().name, "first");

        let full = store.replay(ID, None).unwrap();
        assert_eq!(full.events_applied, 2);
        assert_eq!(full.last_task.unwrap().name, "second");
    }

    #[test]
    fn test_aggregate_latest_and_delete() {
        let (store, _db) = setup();
        store.emit(ID, &EventPayload::note("a"), None).unwrap();
        store.emit(ID, &EventPayload::note("b"), None).unwrap();
        store
            .emit(ID, &EventPayload::task_started("t"), None)
            .unwrap();

        let agg = store.aggregate_by_type(ID).unwrap();
        assert_eq!(agg[0].event_type, "note_added");
        assert_eq!(agg[0].count, 2);
        assert_eq!(agg[0].first_sequence, 1);
        assert_eq!(agg[0].last_sequence, 2);

        let latest = store.latest(ID, 2).unwrap();
        assert_eq!(
            latest.iter().map(|e| e.sequence_num).collect::<Vec<_>>(),
            vec![2, 3]
        );

        assert_eq!(store.delete_for_instance(ID).unwrap(), 3);
        assert_eq!(store.count(ID).unwrap(), 0);
    }

    #[test]
    fn test_unknown_stored_type_decodes_as_unrecognized() {
        let (store, db) = setup();
        db.insert_event_next_seq(&NewEventRow {
            event_id: "evt-future",
            instance_id: ID,
            event_type: "deploy_started",
            timestamp: Utc::now(),
            payload: r#"{"env":"prod"}"#,
            metadata: None,
            parent_event_id: None,
        })
        .unwrap();

        let event = store.get_by_id("evt-future").unwrap();
        assert_eq!(event.kind(), None);
        assert!(matches!(event.payload, EventPayload::Unrecognized { .. }));

        let state = store.replay(ID, None).unwrap();
        assert_eq!(state.events_applied, 1);
    }

    #[test]
    fn test_ancestry_dangling_parent() {
        let (store, db) = setup();
        db.insert_event_next_seq(&NewEventRow {
            event_id: "evt-orphan",
            instance_id: ID,
            event_type: "note_added",
            timestamp: Utc::now(),
            payload: r#"{"text":"orphan"}"#,
            metadata: None,
            parent_event_id: Some("evt-gone"),
        })
        .unwrap();

        let err = store.ancestry("evt-orphan", 10).unwrap_err();
        assert!(matches!(err, Error::EventNotFound(id) if id == "evt-gone"));
    }

    #[test]
    fn test_reads_reject_unknown_instance() {
        let (store, _db) = setup();
        assert!(matches!(
            store.query("ghost-PS-000000", &EventQuery::default()).unwrap_err(),
            Error::InstanceNotFound(_)
        ));
        assert!(store.replay("ghost-PS-000000", None).is_err());
    }
}

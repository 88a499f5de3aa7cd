//! Filter validation and keyset pagination over the event log.
//!
//! Pages are newest-first by `(created_at, seq)`. A cursor carries the
//! watermark of the last row served; the next page is everything strictly
//! older than it, so rows inserted between calls never shift a page.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::event::{AuditEvent, EntityType};
use crate::store::Store;

const TAG_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Validated filter set. `entity_type` and `entity_id` are ANDed; a bare
/// `project_id` yields the project's cross-entity timeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    pub project_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.entity_type.map_or(true, |t| event.entity_type == t)
            && self
                .entity_id
                .as_deref()
                .map_or(true, |id| event.entity_id == id)
            && self
                .project_id
                .as_deref()
                .map_or(true, |p| event.project_id.as_deref() == Some(p))
            && self.since.map_or(true, |since| event.created_at >= since)
    }
}

/// Raw query string of `GET /api/v1/audit/logs`.
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub project_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

impl LogsQuery {
    pub fn to_filter(&self) -> Result<EventFilter, AppError> {
        let entity_type = self
            .entity_type
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<EntityType>)
            .transpose()?;
        let entity_id = self.entity_id.clone().filter(|s| !s.is_empty());
        let project_id = self.project_id.clone().filter(|s| !s.is_empty());

        if entity_id.is_some() && entity_type.is_none() {
            return Err(AppError::Validation(
                "entity_id requires entity_type".to_string(),
            ));
        }

        Ok(EventFilter {
            entity_type,
            entity_id,
            project_id,
            since: self.since,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default_size: usize,
    pub max_size: usize,
}

impl PageLimits {
    pub fn resolve(&self, requested: Option<usize>) -> Result<usize, AppError> {
        match requested {
            None => Ok(self.default_size),
            Some(n) if n >= 1 && n <= self.max_size => Ok(n),
            Some(n) => Err(AppError::Validation(format!(
                "limit must be between 1 and {}, got {n}",
                self.max_size
            ))),
        }
    }
}

/// Position of the last row a client has seen.
#[derive(Debug, Clone, PartialEq)]
pub struct Watermark {
    pub created_at: DateTime<Utc>,
    pub seq: i64,
    pub id: Uuid,
}

impl Watermark {
    pub fn of(event: &AuditEvent) -> Self {
        Watermark {
            created_at: event.created_at,
            seq: event.seq,
            id: event.id,
        }
    }

    /// True when `event` sorts strictly after this watermark in
    /// newest-first order, i.e. belongs on a later page.
    pub fn precedes(&self, event: &AuditEvent) -> bool {
        (event.created_at, event.seq) < (self.created_at, self.seq)
    }
}

/// Mints and verifies opaque cursors. The tag is an HMAC-SHA256 over the
/// watermark, so a forged or foreign cursor is rejected instead of being
/// used to mis-paginate.
#[derive(Clone)]
pub struct CursorCodec {
    key: Vec<u8>,
}

impl CursorCodec {
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    pub fn encode(&self, mark: &Watermark) -> Result<String, AppError> {
        let payload = format!(
            "{}|{}|{}",
            mark.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            mark.seq,
            mark.id
        );
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let tag = mac.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(&tag[..TAG_LEN])
        ))
    }

    pub fn decode(&self, cursor: &str) -> Result<Watermark, AppError> {
        let (payload_b64, tag_b64) = cursor.split_once('.').ok_or(AppError::InvalidCursor)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| AppError::InvalidCursor)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| AppError::InvalidCursor)?;
        if tag.len() != TAG_LEN {
            return Err(AppError::InvalidCursor);
        }
        // Constant-time comparison of the truncated tag.
        let mut mac = self.mac()?;
        mac.update(&payload);
        mac.verify_truncated_left(&tag)
            .map_err(|_| AppError::InvalidCursor)?;

        let payload = String::from_utf8(payload).map_err(|_| AppError::InvalidCursor)?;
        let mut parts = payload.splitn(3, '|');
        let (Some(ts), Some(seq), Some(id)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(AppError::InvalidCursor);
        };
        Ok(Watermark {
            created_at: DateTime::parse_from_rfc3339(ts)
                .map_err(|_| AppError::InvalidCursor)?
                .with_timezone(&Utc),
            seq: seq.parse().map_err(|_| AppError::InvalidCursor)?,
            id: id.parse().map_err(|_| AppError::InvalidCursor)?,
        })
    }

    fn mac(&self) -> Result<HmacSha256, AppError> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cursor key rejected: {e}")))
    }
}

#[derive(Debug, Serialize)]
pub struct EventPage {
    pub logs: Vec<AuditEvent>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Fetches one page. Reads `limit + 1` rows to learn whether another page
/// exists without a count query.
pub async fn fetch_page(
    store: &dyn Store,
    codec: &CursorCodec,
    filter: &EventFilter,
    cursor: Option<&str>,
    limit: usize,
) -> Result<EventPage, AppError> {
    let after = cursor.map(|c| codec.decode(c)).transpose()?;

    let mut logs = store
        .list_events(filter, after.as_ref(), limit.saturating_add(1))
        .await?;
    let has_more = logs.len() > limit;
    logs.truncate(limit);

    let next_cursor = if has_more {
        logs.last()
            .map(|e| codec.encode(&Watermark::of(e)))
            .transpose()?
    } else {
        None
    };

    Ok(EventPage {
        logs,
        next_cursor,
        has_more,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{ActionType, Actor, EventMetadata, NewEvent};
    use crate::store::memory::MemoryStore;
    use std::collections::HashSet;

    fn mark() -> Watermark {
        Watermark {
            created_at: Utc::now(),
            seq: 42,
            id: Uuid::new_v4(),
        }
    }

    fn new_event(entity_id: &str, project_id: &str) -> NewEvent {
        NewEvent {
            project_id: Some(project_id.to_string()),
            entity_type: EntityType::Prompt,
            entity_id: entity_id.to_string(),
            action_type: ActionType::Execute,
            actor: Actor::System,
            metadata: EventMetadata::default(),
        }
    }

    #[test]
    fn test_cursor_round_trips_watermark() {
        let codec = CursorCodec::new("secret");
        let m = mark();
        assert_eq!(codec.decode(&codec.encode(&m).unwrap()).unwrap(), m);
    }

    #[test]
    fn test_foreign_or_tampered_cursor_is_rejected() {
        let codec = CursorCodec::new("secret");
        let other = CursorCodec::new("other-secret");
        let cursor = codec.encode(&mark()).unwrap();

        assert!(matches!(other.decode(&cursor), Err(AppError::InvalidCursor)));
        assert!(matches!(codec.decode("garbage"), Err(AppError::InvalidCursor)));
        assert!(matches!(codec.decode(""), Err(AppError::InvalidCursor)));

        // Swap in a different payload but keep the original tag.
        let (_, tag) = cursor.split_once('.').unwrap();
        let forged = format!("{}.{tag}", URL_SAFE_NO_PAD.encode(b"2020-01-01T00:00:00Z|1|x"));
        assert!(matches!(codec.decode(&forged), Err(AppError::InvalidCursor)));
    }

    #[test]
    fn test_entity_id_requires_entity_type() {
        let query = LogsQuery {
            entity_id: Some("p1".to_string()),
            ..Default::default()
        };
        assert!(matches!(query.to_filter(), Err(AppError::Validation(_))));

        let query = LogsQuery {
            entity_type: Some("prompt".to_string()),
            entity_id: Some("p1".to_string()),
            ..Default::default()
        };
        let filter = query.to_filter().unwrap();
        assert_eq!(filter.entity_type, Some(EntityType::Prompt));
        assert_eq!(filter.entity_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_unknown_entity_type_is_rejected() {
        let query = LogsQuery {
            entity_type: Some("folder".to_string()),
            ..Default::default()
        };
        assert!(matches!(query.to_filter(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_limit_defaults_and_bounds() {
        let limits = PageLimits {
            default_size: 20,
            max_size: 100,
        };
        assert_eq!(limits.resolve(None).unwrap(), 20);
        assert_eq!(limits.resolve(Some(5)).unwrap(), 5);
        assert!(limits.resolve(Some(0)).is_err());
        assert!(limits.resolve(Some(101)).is_err());
    }

    #[tokio::test]
    async fn test_cursor_walk_matches_unlimited_query() {
        let store = MemoryStore::new();
        for i in 0..23 {
            let project = if i % 3 == 0 { "other" } else { "proj" };
            store
                .append_event(new_event(&format!("p{i}"), project))
                .await
                .unwrap();
        }
        let codec = CursorCodec::new("secret");
        let filter = EventFilter {
            project_id: Some("proj".to_string()),
            ..Default::default()
        };

        let all = store.list_events(&filter, None, usize::MAX).await.unwrap();
        assert_eq!(all.len(), 15);

        let mut walked = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = fetch_page(&store, &codec, &filter, cursor.as_deref(), 4)
                .await
                .unwrap();
            assert!(page.logs.len() <= 4);
            walked.extend(page.logs);
            if !page.has_more {
                assert!(page.next_cursor.is_none());
                break;
            }
            cursor = page.next_cursor;
        }

        let walked_ids: Vec<Uuid> = walked.iter().map(|e| e.id).collect();
        let all_ids: Vec<Uuid> = all.iter().map(|e| e.id).collect();
        assert_eq!(walked_ids, all_ids, "pages must concatenate to the full ordered set");
        assert_eq!(walked_ids.iter().collect::<HashSet<_>>().len(), walked_ids.len());
    }

    #[tokio::test]
    async fn test_inserts_between_pages_do_not_shift_results() {
        let store = MemoryStore::new();
        for i in 0..6 {
            store.append_event(new_event(&format!("p{i}"), "proj")).await.unwrap();
        }
        let codec = CursorCodec::new("secret");
        let filter = EventFilter::default();

        let first = fetch_page(&store, &codec, &filter, None, 3).await.unwrap();
        store.append_event(new_event("late", "proj")).await.unwrap();
        let second = fetch_page(&store, &codec, &filter, first.next_cursor.as_deref(), 3)
            .await
            .unwrap();

        assert!(!second.has_more);
        assert_eq!(second.logs.len(), 3);
        assert!(second.logs.iter().all(|e| e.entity_id != "late"));
        let first_ids: HashSet<Uuid> = first.logs.iter().map(|e| e.id).collect();
        assert!(second.logs.iter().all(|e| !first_ids.contains(&e.id)));
    }

    #[test]
    fn test_shortened_tag_is_rejected() {
        let codec = CursorCodec::new("secret");
        let cursor = codec.encode(&mark()).unwrap();
        let (payload, tag) = cursor.split_once('.').unwrap();
        let tag = URL_SAFE_NO_PAD.decode(tag).unwrap();
        let short = format!("{payload}.{}", URL_SAFE_NO_PAD.encode(&tag[..8]));
        assert!(matches!(codec.decode(&short), Err(AppError::InvalidCursor)));
    }

    #[test]
    fn test_since_is_an_inclusive_lower_bound() {
        let at = Utc::now();
        let mut event = AuditEvent {
            id: Uuid::new_v4(),
            seq: 1,
            project_id: None,
            entity_type: EntityType::Prompt,
            entity_id: "p1".to_string(),
            action_type: ActionType::Execute,
            actor: Actor::System,
            metadata: EventMetadata::default(),
            created_at: at,
        };
        let filter = EventFilter {
            since: Some(at),
            ..Default::default()
        };
        assert!(filter.matches(&event));
        event.created_at = at - chrono::Duration::microseconds(1);
        assert!(!filter.matches(&event));
        event.created_at = at + chrono::Duration::microseconds(1);
        assert!(filter.matches(&event));
    }

    #[tokio::test]
    async fn test_since_filter_with_cursor_walk() {
        let store = MemoryStore::new();
        let mut appended = Vec::new();
        for i in 0..7 {
            appended.push(store.append_event(new_event(&format!("p{i}"), "proj")).await.unwrap());
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        // Boundary event itself must be included.
        let since = appended[3].created_at;
        let filter = EventFilter {
            since: Some(since),
            ..Default::default()
        };

        let all = store.list_events(&filter, None, usize::MAX).await.unwrap();
        let all_ids: Vec<&str> = all.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(all_ids, vec!["p6", "p5", "p4", "p3"]);

        let codec = CursorCodec::new("secret");
        let mut walked = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = fetch_page(&store, &codec, &filter, cursor.as_deref(), 1)
                .await
                .unwrap();
            walked.extend(page.logs.into_iter().map(|e| e.entity_id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(walked, vec!["p6", "p5", "p4", "p3"]);
    }

    #[tokio::test]
    async fn test_unbounded_limit_does_not_overflow() {
        let store = MemoryStore::new();
        store.append_event(new_event("p0", "proj")).await.unwrap();
        let codec = CursorCodec::new("secret");
        let page = fetch_page(&store, &codec, &EventFilter::default(), None, usize::MAX)
            .await
            .unwrap();
        assert_eq!(page.logs.len(), 1);
        assert!(!page.has_more);
    }
}

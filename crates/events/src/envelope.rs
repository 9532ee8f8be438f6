use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Event;

/// One journal row: an event plus the record and revision it belongs to.
///
/// Written in the same transaction as the state change. `revision` is the
/// record's version after the event was applied, so `(record_id, revision)`
/// is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    id: Uuid,
    record_id: Uuid,
    /// `invoice`, `device` or `approval`.
    record_kind: String,
    revision: u64,
    name: String,
    schema_version: u32,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn record_id(&self) -> Uuid {
        self.record_id
    }

    pub fn record_kind(&self) -> &str {
        &self.record_kind
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }
}

impl EventEnvelope<serde_json::Value> {
    /// Serializes `event` and stamps it with the record it happened to.
    pub fn seal<E>(
        record_id: Uuid,
        record_kind: &str,
        revision: u64,
        event: &E,
    ) -> Result<Self, serde_json::Error>
    where
        E: Event + Serialize,
    {
        Ok(Self {
            id: Uuid::now_v7(),
            record_id,
            record_kind: record_kind.to_string(),
            revision,
            name: event.event_type().to_string(),
            schema_version: event.version(),
            occurred_at: event.occurred_at(),
            payload: serde_json::to_value(event)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize)]
    struct Voided {
        reason: String,
        at: DateTime<Utc>,
    }

    impl Event for Voided {
        fn event_type(&self) -> &'static str {
            "invoice.voided"
        }

        fn version(&self) -> u32 {
            2
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn seal_keeps_record_and_event_metadata() {
        let at = Utc::now();
        let record = Uuid::now_v7();
        let event = Voided {
            reason: "duplicate".into(),
            at,
        };
        let env = EventEnvelope::seal(record, "invoice", 7, &event).unwrap();

        assert_eq!(env.record_id(), record);
        assert_eq!(env.record_kind(), "invoice");
        assert_eq!(env.revision(), 7);
        assert_eq!(env.name(), "invoice.voided");
        assert_eq!(env.schema_version(), 2);
        assert_eq!(env.occurred_at(), at);
        assert_eq!(env.payload()["reason"], "duplicate");
    }
}

//! Entity projection: raw remote record → `ContentEntity`
//!
//! Pure and total: no I/O, and every record shape the store can return maps
//! to an entity. The only default that is not a plain "empty" value is
//! `created_at`, which falls back to the caller-supplied `now` and is flagged
//! as pending so it is never mistaken for a server timestamp.

use chrono::{DateTime, Utc};
use pulse_api::{ContentEntity, RawRecord};

use crate::config::FieldMap;

/// Maps remote records to feed entities.
pub trait Projection: Send + Sync {
    fn project(&self, record: &RawRecord, now: DateTime<Utc>) -> ContentEntity;
}

impl<F> Projection for F
where
    F: Fn(&RawRecord, DateTime<Utc>) -> ContentEntity + Send + Sync,
{
    fn project(&self, record: &RawRecord, now: DateTime<Utc>) -> ContentEntity {
        self(record, now)
    }
}

/// Projection driven by a `FieldMap`
#[derive(Debug, Clone)]
pub struct FieldProjection {
    fields: FieldMap,
}

impl FieldProjection {
    pub fn new(fields: FieldMap) -> Self {
        Self { fields }
    }
}

impl Projection for FieldProjection {
    fn project(&self, record: &RawRecord, now: DateTime<Utc>) -> ContentEntity {
        project_record(record, &self.fields, now)
    }
}

pub fn project_record(record: &RawRecord, fields: &FieldMap, now: DateTime<Utc>) -> ContentEntity {
    let created_at = record.get_datetime(&fields.created_at);

    ContentEntity {
        id: record.id.clone(),
        owner_id: record.get_string(&fields.owner_id).unwrap_or_default(),
        owner_display_name: record
            .get_string(&fields.owner_display_name)
            .unwrap_or_default(),
        body: record.get_string(&fields.body).unwrap_or_default(),
        media_url: record
            .get_string(&fields.media_url)
            .filter(|url| !url.is_empty()),
        created_at: created_at.unwrap_or(now),
        created_at_pending: created_at.is_none(),
        modified_at: record.get_datetime(&fields.modified_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pulse_api::Value;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_projects_all_mapped_fields() {
        let fields = FieldMap::with_body("tweet");
        let record = RawRecord::new("t1")
            .with_field("userId", "u1")
            .with_field("userName", "Ada")
            .with_field("tweet", "hello")
            .with_field("imageUrl", "memory://tweets/u1/t1")
            .with_field("createdAt", at(100))
            .with_field("modifiedAt", at(200));

        let entity = project_record(&record, &fields, at(999));

        assert_eq!(entity.id, "t1");
        assert_eq!(entity.owner_id, "u1");
        assert_eq!(entity.owner_display_name, "Ada");
        assert_eq!(entity.body, "hello");
        assert_eq!(entity.media_url.as_deref(), Some("memory://tweets/u1/t1"));
        assert_eq!(entity.created_at, at(100));
        assert!(!entity.created_at_pending);
        assert_eq!(entity.modified_at, Some(at(200)));
    }

    #[test]
    fn test_missing_created_at_defaults_to_now_and_is_pending() {
        let record = RawRecord::new("t1").with_field("body", "draft");

        let entity = project_record(&record, &FieldMap::default(), at(42));

        assert_eq!(entity.created_at, at(42));
        assert!(entity.created_at_pending);
    }

    #[test]
    fn test_empty_record_is_tolerated() {
        let record = RawRecord::new("x")
            .with_field("createdAt", Value::Null)
            .with_field("imageUrl", "")
            .with_field("userId", Value::Integer(7));

        let entity = project_record(&record, &FieldMap::default(), at(1));

        assert_eq!(entity.id, "x");
        assert_eq!(entity.owner_id, "");
        assert_eq!(entity.body, "");
        assert_eq!(entity.media_url, None);
        assert!(entity.created_at_pending);
        assert_eq!(entity.modified_at, None);
    }

    #[test]
    fn test_closures_are_projections() {
        let projection = |record: &RawRecord, now: DateTime<Utc>| {
            project_record(record, &FieldMap::with_body("caption"), now)
        };
        let record = RawRecord::new("p").with_field("caption", "sunset");

        assert_eq!(projection.project(&record, at(0)).body, "sunset");
    }
}

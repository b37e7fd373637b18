use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::mapping_templates;

/// Persisted, named mapping configuration. Resolved at submission time; the
/// worker never reads templates.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq)]
#[diesel(table_name = mapping_templates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MappingTemplate {
    pub id: Uuid,
    pub name: String,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = mapping_templates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewMappingTemplate {
    pub name: String,
    pub config: serde_json::Value,
}

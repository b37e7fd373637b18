//! Database access layer for persisted mapping templates.

use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbConn;
use crate::domain::error::{ErrorKind, Result};
use crate::domain::template::{MappingTemplate, NewMappingTemplate};
use crate::schema::mapping_templates::dsl::*;

/// Stores a new named template.
pub fn create(conn: &mut DbConn, entity: NewMappingTemplate) -> Result<MappingTemplate> {
	let template = diesel::insert_into(mapping_templates)
		.values(entity)
		.returning(MappingTemplate::as_returning())
		.get_result(conn)?;
	Ok(template)
}

/// Retrieves a template by ID, failing with `TemplateNotFound` when absent.
pub fn get_by_id(conn: &mut DbConn, template_id: &Uuid) -> Result<MappingTemplate> {
	let template: Option<MappingTemplate> = mapping_templates
		.find(template_id)
		.first(conn)
		.optional()?;
	template.ok_or_else(|| {
		(
			ErrorKind::TemplateNotFound,
			"mapping template not found",
			template_id.to_string(),
		)
			.into()
	})
}

/// Lists all templates, newest first.
pub fn list(conn: &mut DbConn) -> Result<Vec<MappingTemplate>> {
	let templates = mapping_templates
		.order_by(created_at.desc())
		.select(MappingTemplate::as_select())
		.load(conn)?;
	Ok(templates)
}

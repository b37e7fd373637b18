use std::error::Error;

use diesel::pg::Pg;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::info;

use crate::db::DbPool;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Runs all pending migrations on the given database connection.
pub fn run_pending(
	connection: &mut impl MigrationHarness<Pg>,
) -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
	let applied = connection.run_pending_migrations(MIGRATIONS)?;
	if !applied.is_empty() {
		info!("Applied {} pending database migrations", applied.len());
	}

	Ok(())
}

/// Convenience wrapper taking a connection from the pool.
pub fn run_pending_on_pool(pool: &DbPool) -> crate::Result<()> {
	let mut conn = pool.get()?;
	run_pending(&mut conn).map_err(|err| {
		crate::Error::from((
			crate::ErrorKind::InternalError,
			"failed to run database migrations",
			err.to_string(),
		))
	})
}

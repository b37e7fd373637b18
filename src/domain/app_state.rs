//! Application state management module.
//!
//! Provides core shared state functionality for the application:
//! - Shared database connection pool for efficient database access
//! - Durable work queue feeding the import workers
//! - In-process event bus fanning job events out to SSE subscribers
//! - File staging area holding uploaded spreadsheets
//! - Immutable application settings
//!
//! All components are wrapped in [`Arc`] to enable safe concurrency and sharing across threads.
//! Implements traits required by axum for convenient state extraction in request handlers.

use std::fmt::{self, Formatter};
use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts, State};
use derive_more::Deref;

use crate::configuration::Settings;
use crate::db::{DbPool, connection};
use crate::events::EventBus;
use crate::ingest::staging::FileStaging;
use crate::queue::WorkQueue;

/// Thread-safe shared handle to a database connection pool.
///
/// Combines `Arc` with `DbPool` to allow multiple parts of the application
/// to access the database concurrently and efficiently.
/// Implements `FromRef<AppState>` to enable extraction from app state in handlers.
pub type AppPool = Arc<DbPool>;

impl FromRef<AppState> for AppPool {
	fn from_ref(state: &AppState) -> Self {
		Arc::clone(&state.db_pool)
	}
}

/// Thread-safe shared handle to the durable work queue.
pub type AppQueue = Arc<WorkQueue>;

impl FromRef<AppState> for AppQueue {
	fn from_ref(state: &AppState) -> Self {
		Arc::clone(&state.work_queue)
	}
}

/// Thread-safe shared handle to the in-process event bus.
pub type AppEvents = Arc<EventBus>;

impl FromRef<AppState> for AppEvents {
	fn from_ref(state: &AppState) -> Self {
		Arc::clone(&state.event_bus)
	}
}

/// Thread-safe shared handle to the upload staging area.
pub type AppStaging = Arc<FileStaging>;

impl FromRef<AppState> for AppStaging {
	fn from_ref(state: &AppState) -> Self {
		Arc::clone(&state.staging)
	}
}

/// Core application state shared across all request handlers and workers.
#[derive(Clone, FromRef)]
pub struct App {
	/// Shared database connection pool
	pub db_pool: AppPool,
	/// Durable work queue carrying job identifiers to the workers
	pub work_queue: AppQueue,
	/// In-process publish/subscribe channel for live import events
	pub event_bus: AppEvents,
	/// Staging area for uploaded spreadsheet files
	pub staging: AppStaging,
	/// Global application settings
	pub settings: Settings,
}

impl fmt::Debug for App {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		// For brevity and relevance, only output db pool state summary
		let db_state = self.db_pool.state();
		f.debug_struct("App").field("db_pool", &db_state).finish()
	}
}

impl App {
	/// Constructs a new `App` with a fresh database pool initialized from settings.
	///
	/// # Arguments
	///
	/// * `settings` - Application configuration including DB parameters
	pub fn new(settings: Settings) -> Self {
		let db_pool = Arc::new(connection::initialize_pool(&settings.database));
		Self::with_pool(db_pool, settings)
	}

	/// Constructs a new `App` using an existing database pool.
	///
	/// Useful for testing or if the app already manages a pool externally.
	///
	/// # Arguments
	///
	/// * `db_pool` - Pre-existing shared database pool
	/// * `settings` - Application configuration
	pub fn with_pool(db_pool: AppPool, settings: Settings) -> Self {
		let work_queue = Arc::new(WorkQueue::new(
			Arc::clone(&db_pool),
			settings.import.queue_visibility_sec,
		));
		let event_bus = Arc::new(EventBus::new());
		let staging = Arc::new(FileStaging::new(&settings.import.upload_dir));

		Self {
			db_pool,
			work_queue,
			event_bus,
			staging,
			settings,
		}
	}
}

/// Thread-safe wrapper around the application state for axum integration.
///
/// Implements axum's `FromRequestParts` to enable extraction of shared app state in routes,
/// wrapped inside an `Arc` for safe concurrent access. Also, derefs transparently to `App`.
#[derive(Clone, FromRequestParts, Deref)]
#[from_request(via(State))]
pub struct AppState(pub Arc<App>);

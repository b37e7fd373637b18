#![allow(dead_code)]

mod helpers;

use std::env;
use std::sync::{Arc, LazyLock};

use axum::Router;
use axum_test::util::new_random_tokio_tcp_listener;
use diesel::{Connection, PgConnection, RunQueryDsl, sql_query};
use ingesta::Result;
use ingesta::configuration::{DatabaseSettings, Settings, get_settings};
use ingesta::db::DbConn;
use ingesta::db::connection::{DbPool, initialize_pool};
use ingesta::db::migrations::run_pending;
use ingesta::domain::app_state::{App, AppPool, AppState};
use secrecy::{ExposeSecret, SecretString};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt, registry};
use uuid::Uuid;

pub use crate::common::helpers::*;

/// Test harness containing the core application components for integration
/// testing.
///
/// Provides access to the initialized application state, router, and
/// database pool without actually starting an HTTP server.
pub struct TestHarness {
	/// The initialized application instance with all dependencies
	pub app: Arc<App>,
	/// The configured axum router ready for testing
	pub router: Router,
	/// Database connection pool for direct database access in tests
	pub db_pool: DbPool,
	/// Internal shared pointer to the connection pool.
	app_pool: AppPool,
}

/// Running test server instance with network access.
pub struct TestApp {
	/// The HTTP address where the server is listening
	pub address: String,
	/// Database connection pool for test data management
	pub db_pool: DbPool,
	/// The underlying application instance
	pub app: Arc<App>,
}

impl TestHarness {
	/// Initializes a test harness with a fresh application instance, an
	/// isolated database, and an isolated staging directory.
	pub fn new() -> Self {
		Self::new_with(|_| {})
	}

	/// Same as [`TestHarness::new`] but lets the test tweak settings (batch
	/// size, throttling, heartbeat) before the app is built.
	pub fn new_with(customize: impl FnOnce(&mut Settings)) -> Self {
		LazyLock::force(&TRACING);

		let mut settings = get_settings().expect("Failed to read configuration");

		// Create an isolated test database and update settings
		let (db_pool, updated_db_settings) = create_isolated_test_database(&mut settings.database);
		settings.database = updated_db_settings.clone();

		// Isolated staging directory per harness
		settings.import.upload_dir =
			env::temp_dir().join(format!("ingesta-test-{}", Uuid::new_v4()));

		customize(&mut settings);

		let pool = Arc::new(db_pool.clone());
		let app_pool = Arc::clone(&pool);
		let app = Arc::new(App::with_pool(pool, settings));
		app.staging
			.ensure_root()
			.expect("Failed to create staging directory");

		Self {
			app: Arc::clone(&app),
			db_pool,
			app_pool,
			router: ingesta::net::router::init(AppState(app)),
		}
	}

	pub fn state(&self) -> AppState {
		AppState(Arc::clone(&self.app))
	}

	pub fn get_conn(&self) -> DbConn {
		self.db_pool.get().expect("Failed to get connection")
	}
}

impl TestApp {
	/// Spawns a test server bound to a random port and returns a handle to
	/// the running instance.
	pub fn new() -> Self {
		Self::new_with(|_| {})
	}

	pub fn new_with(customize: impl FnOnce(&mut Settings)) -> Self {
		let harness = TestHarness::new_with(customize);
		let app = Arc::clone(&harness.app);

		// Bind to a random available port
		let listener = new_random_tokio_tcp_listener().expect("Failed to bind to random port");
		let port = listener
			.local_addr()
			.expect("Failed to get local address")
			.port();

		// Start the server in a background task
		tokio::spawn(async move {
			axum::serve(listener, harness.router)
				.await
				.expect("Server failed to start");
		});

		Self {
			address: format!("http://localhost:{port}"),
			db_pool: harness.db_pool,
			app,
		}
	}

	pub fn state(&self) -> AppState {
		AppState(Arc::clone(&self.app))
	}

	pub fn get_conn(&self) -> DbConn {
		self.db_pool.get().expect("Failed to get connection")
	}
}

/// Creates an isolated test database with a unique name and runs migrations.
fn create_isolated_test_database(config: &mut DatabaseSettings) -> (DbPool, &mut DatabaseSettings) {
	// Generate unique database name to avoid conflicts between concurrent tests
	config.database_name = format!("ingesta_test_{}", Uuid::new_v4().simple());

	// Create connection settings for the PostgreSQL system database
	let mut system_db_settings = config.clone();
	system_db_settings.database_name = "postgres".to_string();
	system_db_settings.username = "postgres".to_string();
	system_db_settings.password = SecretString::new("password".into());
	system_db_settings.pool_size = Some(1);

	// Connect to the system database and create the test database
	let mut system_conn =
		PgConnection::establish(system_db_settings.connection_string().expose_secret())
			.expect("Failed to connect to PostgreSQL system database");

	sql_query(format!(r#"CREATE DATABASE "{}";"#, config.database_name).as_str())
		.execute(&mut system_conn)
		.expect("Failed to create test database");

	// Switch to the newly created test database for permission setup
	system_db_settings.database_name = config.database_name.clone();
	let mut test_db_conn =
		PgConnection::establish(system_db_settings.connection_string().expose_secret())
			.expect("Failed to connect to test database");

	grant_database_permissions(&mut test_db_conn, &config.database_name, &config.username);

	// Connect with application credentials and run migrations
	let mut app_conn = PgConnection::establish(config.connection_string().expose_secret())
		.expect("Failed to connect to test database with application credentials");

	run_pending(&mut app_conn).expect("Failed to run database migrations");

	(initialize_pool(config), config)
}

/// Grants the permissions the application user needs on the test database.
fn grant_database_permissions(conn: &mut PgConnection, database_name: &str, username: &str) {
	sql_query(format!(r#"GRANT ALL ON DATABASE "{database_name}" TO "{username}";"#).as_str())
		.execute(conn)
		.expect("Failed to grant database privileges");

	sql_query(format!(r#"GRANT USAGE, CREATE ON SCHEMA public TO "{username}";"#).as_str())
		.execute(conn)
		.expect("Failed to grant schema privileges");

	sql_query(format!(r#"GRANT ALL ON ALL TABLES IN SCHEMA public TO "{username}";"#).as_str())
		.execute(conn)
		.expect("Failed to grant table privileges");

	sql_query(
		format!(
			r#"ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT ALL ON TABLES TO "{username}";"#
		)
		.as_str(),
	)
	.execute(conn)
	.expect("Failed to set default table privileges");
}

/// Global tracing initialization for tests, initialized lazily.
static TRACING: LazyLock<Result<()>> = LazyLock::new(configure_test_tracing);

/// Configures tracing for the test environment.
///
/// With `TEST_LOG` set, log output is visible; otherwise it stays silent.
fn configure_test_tracing() -> Result<()> {
	let subscriber =
		registry().with(EnvFilter::from_default_env().add_directive(LevelFilter::TRACE.into()));

	if env::var("TEST_LOG").is_ok() {
		let subscriber_with_fmt = subscriber.with(fmt::Layer::new().with_test_writer());
		tracing::subscriber::set_global_default(subscriber_with_fmt)
			.expect("Failed to set global tracing subscriber");
	} else {
		tracing::subscriber::set_global_default(subscriber)
			.expect("Failed to set global tracing subscriber");
	}

	Ok(())
}

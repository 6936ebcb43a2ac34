pub mod ask;
pub mod config;
pub mod email;
pub mod event;
pub mod feed;
pub mod profile;
pub mod project;
pub mod role;
/// Database schema
pub mod schema;
pub mod user;

use diesel::connection::{
    DefaultLoadingMode, LoadConnection, TransactionManager,
};
use diesel::expression::QueryMetadata;
use diesel::migration::{MigrationConnection, CREATE_MIGRATIONS_TABLE};
use diesel::query_builder::Query;
use diesel::{
    connection::{
        AnsiTransactionManager, ConnectionSealed, Instrumentation,
        InstrumentationEvent, SimpleConnection,
    },
    query_builder::{QueryFragment, QueryId},
    r2d2::{ConnectionManager, CustomizeConnection, ManageConnection, Pool},
    sqlite::Sqlite,
    Connection, ConnectionResult, QueryResult, SqliteConnection,
};
use diesel::{sql_query, RunQueryDsl};
use rocket::{Build, Rocket};
use rocket_sync_db_pools::{database, Config, PoolResult, Poolable};

/// Any SQLite connection the application code can run queries on. Both the
/// pooled [`AnthillConnection`] and a bare [`SqliteConnection`] (used in
/// tests) qualify.
pub trait SqliteConn: Connection<Backend = Sqlite> + LoadConnection {}

impl<C> SqliteConn for C where C: Connection<Backend = Sqlite> + LoadConnection {}

/// Settings applied to every connection as it leaves the pool.
pub const CONNECTION_PRAGMAS: &str = "\
    PRAGMA journal_mode = WAL;\
    PRAGMA busy_timeout = 1000;\
    PRAGMA foreign_keys = ON;\
";

#[database("anthill")]
pub struct DbConn(AnthillConnection);

/// A SQLite connection which reports every query to `tracing`.
pub struct AnthillConnection(SqliteConnection);

impl SimpleConnection for AnthillConnection {
    #[tracing::instrument(skip(self, query))]
    fn batch_execute(&mut self, query: &str) -> QueryResult<()> {
        self.0.batch_execute(query)
    }
}

impl ConnectionSealed for AnthillConnection {}

impl Connection for AnthillConnection {
    type Backend = Sqlite;
    type TransactionManager = AnsiTransactionManager;

    fn establish(database_url: &str) -> ConnectionResult<AnthillConnection> {
        let mut conn = SqliteConnection::establish(database_url)?;
        conn.set_instrumentation(QueryTracer);
        Ok(AnthillConnection(conn))
    }

    #[tracing::instrument(skip(self, f))]
    fn transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<diesel::result::Error>,
    {
        Self::TransactionManager::transaction(self, f)
    }

    fn execute_returning_count<T>(&mut self, source: &T) -> QueryResult<usize>
    where
        T: QueryFragment<Sqlite> + QueryId,
    {
        self.0.execute_returning_count(source)
    }

    fn transaction_state(&mut self) -> &mut Self::TransactionManager {
        self.0.transaction_state()
    }

    fn instrumentation(&mut self) -> &mut dyn Instrumentation {
        self.0.instrumentation()
    }

    fn set_instrumentation(&mut self, instrumentation: impl Instrumentation) {
        self.0.set_instrumentation(instrumentation)
    }
}

impl LoadConnection<DefaultLoadingMode> for AnthillConnection {
    type Cursor<'conn, 'query>
        = <SqliteConnection as LoadConnection<DefaultLoadingMode>>::Cursor<
        'conn,
        'query,
    >
    where
        Self: 'conn;
    type Row<'conn, 'query>
        = <SqliteConnection as LoadConnection<DefaultLoadingMode>>::Row<
        'conn,
        'query,
    >
    where
        Self: 'conn;

    #[tracing::instrument(skip(self, source))]
    fn load<'conn, 'query, T>(
        &'conn mut self,
        source: T,
    ) -> QueryResult<Self::Cursor<'conn, 'query>>
    where
        T: Query + QueryFragment<Self::Backend> + QueryId + 'query,
        Self::Backend: QueryMetadata<T::SqlType>,
    {
        self.0.load(source)
    }
}

impl MigrationConnection for AnthillConnection {
    fn setup(&mut self) -> QueryResult<usize> {
        sql_query(CREATE_MIGRATIONS_TABLE).execute(self)
    }
}

/// Logs queries at `trace` level and failed queries at `warn` level.
struct QueryTracer;

impl Instrumentation for QueryTracer {
    fn on_connection_event(&mut self, event: InstrumentationEvent<'_>) {
        match event {
            InstrumentationEvent::StartQuery { query, .. } => {
                tracing::trace!("Started running query {query:?}");
            }
            InstrumentationEvent::FinishQuery {
                query,
                error: Some(error),
                ..
            } => {
                tracing::warn!(
                    "Encountered an error when running query {query} (error: {error})"
                );
            }
            _ => (),
        }
    }
}

pub struct AnthillConnectionManager {
    manager: ConnectionManager<SqliteConnection>,
}

impl ManageConnection for AnthillConnectionManager {
    type Connection = AnthillConnection;

    type Error = diesel::r2d2::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        self.manager.connect().map(|mut conn| {
            conn.set_instrumentation(QueryTracer);
            AnthillConnection(conn)
        })
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        self.manager.is_valid(&mut conn.0)
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        self.manager.has_broken(&mut conn.0)
    }
}

#[derive(Debug)]
struct ApplyPragmas;

impl CustomizeConnection<AnthillConnection, diesel::r2d2::Error>
    for ApplyPragmas
{
    fn on_acquire(
        &self,
        conn: &mut AnthillConnection,
    ) -> Result<(), diesel::r2d2::Error> {
        conn.0
            .batch_execute(CONNECTION_PRAGMAS)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

impl Poolable for AnthillConnection {
    type Manager = AnthillConnectionManager;

    type Error = std::convert::Infallible;

    fn pool(db_name: &str, rocket: &Rocket<Build>) -> PoolResult<Self> {
        let config = Config::from(db_name, rocket)?;
        let manager = AnthillConnectionManager {
            manager: ConnectionManager::new(&config.url),
        };
        let pool = Pool::builder()
            .connection_customizer(Box::new(ApplyPragmas))
            .max_size(config.pool_size)
            .connection_timeout(std::time::Duration::from_secs(
                config.timeout as u64,
            ))
            .build(manager)?;

        Ok(pool)
    }
}

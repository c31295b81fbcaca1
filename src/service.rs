use crate::config::Config;
use crate::error::ServiceError;
use crate::Result;
use async_trait::async_trait;
use sqlx::mssql::{Mssql, MssqlConnectOptions, MssqlConnection};
use sqlx::pool::PoolOptions;
use sqlx::{ConnectOptions, Connection, Pool};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// The three remote touch-points of a trial, identified for attempt counters
/// and retry events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CheckExistence,
    Create,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::CheckExistence => f.write_str("existence check"),
            OperationKind::Create => f.write_str("creation"),
            OperationKind::Delete => f.write_str("deletion"),
        }
    }
}

/// Request descriptor for one logical remote operation against the service.
#[derive(Debug, Clone)]
pub enum RemoteOperation<'a> {
    CheckExistence {
        name: &'a str,
    },
    Create {
        name: &'a str,
    },
    Delete {
        name: &'a str,
        /// Force the database into single-user mode before dropping. Skipped
        /// server-side on elastic deployments via the engine-edition guard.
        force_single_user: bool,
    },
}

impl RemoteOperation<'_> {
    pub fn kind(&self) -> OperationKind {
        match self {
            RemoteOperation::CheckExistence { .. } => OperationKind::CheckExistence,
            RemoteOperation::Create { .. } => OperationKind::Create,
            RemoteOperation::Delete { .. } => OperationKind::Delete,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RemoteOperation::CheckExistence { name }
            | RemoteOperation::Create { name }
            | RemoteOperation::Delete { name, .. } => name,
        }
    }
}

/// Boundary to the remote provisioning service. One call here is one attempt;
/// retrying is the wrapper's job.
#[async_trait]
pub trait DatabaseService: Send + Sync {
    /// Perform a single attempt. `Ok(())` means success; for `CheckExistence`
    /// success means "exists" and the not-found condition arrives as a server
    /// error carrying one of the not-found codes.
    async fn perform(&self, op: &RemoteOperation<'_>) -> Result<()>;

    /// Discard any pooled connection state for the named database. Called
    /// right after a successful create, because a pooled connection can keep
    /// serving a cached "not found" during visibility polling.
    async fn invalidate(&self, name: &str);
}

/// Production implementation over the server's wire protocol.
///
/// Existence checks acquire (and immediately release) a connection from a
/// small lazy pool scoped to the target database; create and delete open a
/// fresh connection to the admin catalog for every attempt, the same
/// connection discipline as the original reproduction.
pub struct SqlServerService {
    options: MssqlConnectOptions,
    admin_catalog: String,
    operation_timeout: Duration,
    pools: Mutex<HashMap<String, Pool<Mssql>>>,
}

impl SqlServerService {
    pub fn new(config: &Config) -> std::result::Result<Self, sqlx::Error> {
        let options: MssqlConnectOptions = config.uri.parse()?;
        Ok(SqlServerService {
            options,
            admin_catalog: "master".to_owned(),
            operation_timeout: config.operation_timeout,
            pools: Mutex::new(HashMap::new()),
        })
    }

    async fn pool_for(&self, name: &str) -> Pool<Mssql> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(name) {
            return pool.clone();
        }
        let pool = PoolOptions::<Mssql>::new()
            .max_connections(1)
            .connect_timeout(self.operation_timeout)
            .connect_lazy_with(self.options.clone().database(name));
        pools.insert(name.to_owned(), pool.clone());
        pool
    }

    async fn check_existence(&self, name: &str) -> Result<()> {
        let pool = self.pool_for(name).await;
        // Opening a connection scoped to the database is the existence probe;
        // release it before anything else touches the name.
        let conn = pool.acquire().await.map_err(into_service_error)?;
        drop(conn);
        Ok(())
    }

    async fn admin_connection(&self) -> Result<MssqlConnection> {
        let options = self.options.clone().database(&self.admin_catalog);
        match timeout(self.operation_timeout, options.connect()).await {
            Ok(conn) => conn.map_err(into_service_error),
            Err(_) => Err(ServiceError::Timeout),
        }
    }

    async fn run_statement(&self, conn: &mut MssqlConnection, sql: &str) -> Result<()> {
        match timeout(self.operation_timeout, sqlx::query(sql).execute(&mut *conn)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(into_service_error(e)),
            Err(_) => Err(ServiceError::Timeout),
        }
    }

    async fn create(&self, name: &str) -> Result<()> {
        let mut conn = self.admin_connection().await?;
        let sql = format!("CREATE DATABASE {};", name);
        let res = self.run_statement(&mut conn, &sql).await;
        let _ = conn.close().await;
        res
    }

    async fn delete(&self, name: &str, force_single_user: bool) -> Result<()> {
        let mut conn = self.admin_connection().await?;
        let sql = if force_single_user {
            // The engine-edition guard skips SINGLE_USER on elastic
            // deployments, where ALTER DATABASE is not permitted.
            format!(
                "IF SERVERPROPERTY('EngineEdition') <> 5\nBEGIN\n    ALTER DATABASE {db} SET SINGLE_USER WITH ROLLBACK IMMEDIATE;\nEND\nDROP DATABASE {db};",
                db = name
            )
        } else {
            format!("DROP DATABASE {};", name)
        };
        let res = self.run_statement(&mut conn, &sql).await;
        let _ = conn.close().await;
        res
    }
}

#[async_trait]
impl DatabaseService for SqlServerService {
    async fn perform(&self, op: &RemoteOperation<'_>) -> Result<()> {
        match op {
            RemoteOperation::CheckExistence { name } => self.check_existence(name).await,
            RemoteOperation::Create { name } => self.create(name).await,
            RemoteOperation::Delete {
                name,
                force_single_user,
            } => self.delete(name, *force_single_user).await,
        }
    }

    async fn invalidate(&self, name: &str) {
        let pool = self.pools.lock().await.remove(name);
        if let Some(pool) = pool {
            pool.close().await;
        }
    }
}

fn into_service_error(err: sqlx::Error) -> ServiceError {
    match err {
        sqlx::Error::Database(db) => {
            let codes = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .into_iter()
                .collect();
            ServiceError::Server {
                codes,
                message: db.message().to_owned(),
            }
        }
        sqlx::Error::PoolTimedOut => ServiceError::Timeout,
        other => ServiceError::Driver(other.to_string()),
    }
}

//! Connection pool utilities
//!
//! Thin helpers over `deadpool-postgres`. Pooled clients implement
//! [`crate::GenericClient`], so anything built on fragments runs unchanged on
//! a pooled connection. Type decoding is tokio-postgres's own, configured
//! per connection; there is no process-wide decoder registry to mutate.

use crate::error::{SpliceError, SpliceResult};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tokio_postgres::Socket;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};

const DEFAULT_MAX_SIZE: usize = 16;

/// Create a connection pool from a database URL.
///
/// Uses `NoTls` and small defaults, suitable for local development and tests.
/// Production deployments that need TLS should use [`create_pool_with_tls`].
pub fn create_pool(database_url: &str) -> SpliceResult<Pool> {
    create_pool_sized(database_url, DEFAULT_MAX_SIZE)
}

/// Create a `NoTls` connection pool with a custom maximum size.
pub fn create_pool_sized(database_url: &str, max_size: usize) -> SpliceResult<Pool> {
    build_pool(database_url, NoTls, max_size)
}

/// Create a connection pool using a custom TLS connector.
pub fn create_pool_with_tls<T>(database_url: &str, tls: T, max_size: usize) -> SpliceResult<Pool>
where
    T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
    T::Stream: Sync + Send,
    T::TlsConnect: Sync + Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    build_pool(database_url, tls, max_size)
}

fn build_pool<T>(database_url: &str, tls: T, max_size: usize) -> SpliceResult<Pool>
where
    T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
    T::Stream: Sync + Send,
    T::TlsConnect: Sync + Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    let pg_config: tokio_postgres::Config = database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| SpliceError::Connection(e.to_string()))?;

    let manager_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let manager = Manager::from_config(pg_config, tls, manager_config);

    Pool::builder(manager)
        .max_size(max_size)
        .build()
        .map_err(|e| SpliceError::Pool(e.to_string()))
}

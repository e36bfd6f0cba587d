//! Pool provider abstraction for read/write routing.
//!
//! [`PostgresRequestManager`](super::PostgresRequestManager) sends every transaction,
//! including the `FOR UPDATE` locks taken by submissions and decisions, to `write()`.
//! Listings and audits go to `read()`, which may point at a replica.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Trait for providing database pools with read/write routing.
///
/// # Example
///
/// ```ignore
/// use turnstile::PoolProvider;
/// use sqlx::PgPool;
///
/// #[derive(Clone)]
/// struct AppPools {
///     primary: PgPool,
///     replica: Option<PgPool>,
/// }
///
/// impl PoolProvider for AppPools {
///     fn read(&self) -> &PgPool {
///         self.replica.as_ref().unwrap_or(&self.primary)
///     }
///
///     fn write(&self) -> &PgPool {
///         &self.primary
///     }
/// }
/// ```
pub trait PoolProvider: Clone + Send + Sync + 'static {
    /// Pool for reads that tolerate replica lag: request listings, seat audits.
    fn read(&self) -> &PgPool;

    /// Pool for transactions and locking reads. Must be the primary.
    fn write(&self) -> &PgPool;
}

/// Single pool used for both reads and writes.
impl PoolProvider for PgPool {
    fn read(&self) -> &PgPool {
        self
    }

    fn write(&self) -> &PgPool {
        self
    }
}

/// Test pool provider whose read pool refuses writes.
///
/// Both pools connect to the same database, but every replica connection runs with
/// `default_transaction_read_only = on`. A write routed through `read()` fails with
/// "cannot execute ... in a read-only transaction".
#[derive(Clone, Debug)]
pub struct TestDbPools {
    primary: PgPool,
    replica: PgPool,
}

impl TestDbPools {
    pub async fn new(pool: PgPool) -> Result<Self, sqlx::Error> {
        let primary = pool.clone();

        let replica = PgPoolOptions::new()
            .max_connections(pool.options().get_max_connections())
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("SET default_transaction_read_only = on")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect_with(pool.connect_options().as_ref().clone())
            .await?;

        Ok(Self { primary, replica })
    }
}

impl PoolProvider for TestDbPools {
    fn read(&self) -> &PgPool {
        &self.replica
    }

    fn write(&self) -> &PgPool {
        &self.primary
    }
}

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;

use crate::db::models::group::GroupId;
use crate::db::models::member::MemberKey;
use crate::db::store::Store;
use crate::db::store::memory::MemoryStore;
use crate::db::store::postgres::PgStore;

pub mod models;
pub mod store;

pub mod prelude {
    pub use crate::db::{StoreError, StoreResult};

    pub use crate::db::models::group::{Group, GroupId};
    pub use crate::db::models::member::{Member, MemberKey, UserId};

    pub use crate::db::store::Store;
    pub use crate::db::store::memory::MemoryStore;
    pub use crate::db::store::postgres::PgStore;
}

/// Picks the backing store for this process.
///
/// An empty `database_url` keeps everything in memory, which is only meant for local runs: every
/// score is lost on restart.
pub async fn connect(database_url: &str) -> StoreResult<Arc<dyn Store>> {
    if database_url.is_empty() {
        tracing::warn!("no DATABASE_URL configured, falling back to the in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = PgPool::connect(database_url).await?;
    let store = PgStore::new(pool);
    store.migrate().await?;

    tracing::info!("connected to postgres and applied migrations");
    Ok(Arc::new(store))
}

pub type StoreResult<T> = core::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("group {0} does not exist")]
    MissingGroup(GroupId),

    #[error("member {0} does not exist")]
    MissingMember(MemberKey),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

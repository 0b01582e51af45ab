//! Unit of Work implementation
//!
//! Provides the transactional scope the Postgres repository runs every
//! mutation in. Dropping an uncommitted unit rolls it back.

use futures::future::BoxFuture;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::{Error, Result};

/// Unit of Work for managing database transactions
pub struct UnitOfWork {
    tx: Option<Transaction<'static, Postgres>>,
}

impl UnitOfWork {
    /// Begin a new transaction
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        let tx = pool.begin().await?;
        Ok(Self { tx: Some(tx) })
    }

    /// Commit the transaction
    pub async fn commit(mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    /// Rollback the transaction
    pub async fn rollback(mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    /// Connection to run repository statements on
    pub fn conn(&mut self) -> Result<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| Error::Internal("transaction already consumed".to_string()))
    }
}

/// Run `f` in a transaction, committing on `Ok` and rolling back on `Err`
pub async fn with_transaction<F, R>(pool: &PgPool, f: F) -> Result<R>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<R>> + Send,
    R: Send,
{
    let mut uow = UnitOfWork::begin(pool).await?;
    match f(uow.conn()?).await {
        Ok(result) => {
            uow.commit().await?;
            Ok(result)
        }
        Err(e) => {
            uow.rollback().await?;
            Err(e)
        }
    }
}

/*!
 * Transaction scope helper
 *
 * Every multi-row write in the crate goes through `transaction_scope`, which commits when
 * the closure returns `Ok` and rolls back on `Err` or when the future is dropped.
 */

use futures::future::BoxFuture;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionError, TransactionTrait};
use tracing::debug;

/// Execute `f` inside a database transaction.
///
/// Unlike a bare `DatabaseConnection::transaction`, the caller's error type comes back
/// unchanged, so typed failures such as `ServiceError::StaleCart` survive the rollback.
///
/// ```rust,ignore
/// let order = transaction_scope(&db, |txn| {
///     Box::pin(async move {
///         let order = order_model.insert(txn).await?;
///         order_item::Entity::insert_many(items).exec(txn).await?;
///         Ok(order)
///     })
/// })
/// .await?;
/// ```
pub async fn transaction_scope<F, T, E>(db: &DatabaseConnection, f: F) -> Result<T, E>
where
    F: for<'c> FnOnce(&'c DatabaseTransaction) -> BoxFuture<'c, Result<T, E>> + Send,
    T: Send,
    E: From<DbErr> + std::fmt::Display + std::fmt::Debug + Send,
{
    db.transaction::<F, T, E>(f).await.map_err(|e| match e {
        TransactionError::Connection(db_err) => {
            debug!("transaction failed at connection level: {}", db_err);
            E::from(db_err)
        }
        TransactionError::Transaction(err) => err,
    })
}

//! Transaction helpers

use rusqlite::{Connection, Transaction, TransactionBehavior};

use super::Result;

/// Execute operation within a transaction.
///
/// Commits when the closure returns `Ok`; on `Err` the transaction is
/// rolled back when it is dropped.
pub fn execute_in_transaction<F, T>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    operation: F,
) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(behavior)?;
    let result = operation(&tx)?;
    tx.commit()?;
    Ok(result)
}

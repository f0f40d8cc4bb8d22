//! Async bridge for blocking SQLite calls
//!
//! SQLite operations are synchronous; the service runs on tokio. Every
//! warehouse call goes through `spawn_blocking` so a slow statement never
//! stalls the IPC accept loop or the scheduler.
//!
//! Dropping the future returned by [`with_connection`] does not stop the
//! blocking closure. Writes that must be abortable go through
//! [`with_interruptible_connection`] and an [`Interrupter`].

use std::sync::{Arc, Mutex};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, InterruptHandle};

use super::{DbError, Result};

/// Execute a blocking database operation on a pooled connection.
pub async fn with_connection<F, T>(pool: &Pool<SqliteConnectionManager>, f: F) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();

    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await
    .map_err(|e| DbError::Join(e.to_string()))?
}

/// Aborts the statement running under [`with_interruptible_connection`].
///
/// One interrupter serves one closure at a time. A request that lands
/// before the connection is checked out fails the closure before it runs;
/// a request that lands between two statements is seen by
/// [`Interrupter::check`].
#[derive(Clone, Default)]
pub struct Interrupter {
    slot: Arc<Mutex<InterruptSlot>>,
}

#[derive(Default)]
struct InterruptSlot {
    handle: Option<InterruptHandle>,
    requested: bool,
}

impl Interrupter {
    /// Abort the statement in flight, if any, and fail the next `check`.
    pub fn interrupt(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.requested = true;
            if let Some(handle) = &slot.handle {
                handle.interrupt();
            }
        }
    }

    /// `Err(DbError::Interrupted)` once an interrupt has been requested.
    pub fn check(&self) -> Result<()> {
        let requested = self.slot.lock().map(|slot| slot.requested).unwrap_or(false);
        if requested {
            Err(DbError::Interrupted)
        } else {
            Ok(())
        }
    }

    fn arm(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.requested = false;
            slot.handle = None;
        }
    }

    fn attach(&self, conn: &Connection) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| DbError::Join("interrupt slot poisoned".to_string()))?;
        if slot.requested {
            return Err(DbError::Interrupted);
        }
        slot.handle = Some(conn.get_interrupt_handle());
        Ok(())
    }

    fn detach(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.handle = None;
        }
    }
}

/// Clears the handle before the connection goes back to the pool.
struct Detach<'a>(&'a Interrupter);

impl Drop for Detach<'_> {
    fn drop(&mut self) {
        self.0.detach();
    }
}

/// Like [`with_connection`], but `interrupter` can abort the closure's
/// statements while it runs.
pub async fn with_interruptible_connection<F, T>(
    pool: &Pool<SqliteConnectionManager>,
    interrupter: &Interrupter,
    f: F,
) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    let interrupter = interrupter.clone();
    interrupter.arm();

    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        interrupter.attach(&conn)?;
        let _detach = Detach(&interrupter);
        f(&mut conn)
    })
    .await
    .map_err(|e| DbError::Join(e.to_string()))?
}

mod init;
pub mod meetings;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use thiserror::Error;

pub use init::{init_db, migrate};
pub use meetings::{
    MeetingFields, MeetingKey, MeetingRecord, MeetingRepository, MeetingStore, ProcessingStatus,
    RecordingFile, SqliteMeetingStore, StoreError, Transcript,
};

/// One connection shared by the queue, the in-flight registry and the
/// meeting store.
pub type SharedConnection = Arc<Mutex<Connection>>;

pub fn shared(conn: Connection) -> SharedConnection {
    Arc::new(Mutex::new(conn))
}

#[derive(Debug, Error)]
pub enum BlockingError {
    #[error("database connection lock poisoned")]
    Poisoned,
    #[error("database task failed: {0}")]
    Join(String),
}

/// Run `f` against the shared connection on the blocking pool.
pub async fn with_connection<T, E, F>(conn: &SharedConnection, f: F) -> Result<T, E>
where
    F: FnOnce(&Connection) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<BlockingError> + Send + 'static,
{
    let conn = conn.clone();
    tokio::task::spawn_blocking(move || {
        let guard = conn.lock().map_err(|_| E::from(BlockingError::Poisoned))?;
        f(&guard)
    })
    .await
    .map_err(|e| E::from(BlockingError::Join(e.to_string())))?
}

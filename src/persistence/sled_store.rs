//! Journal backed by `sled`.
//!
//! Keys are the broker's sequence numbers in big-endian form so iteration
//! yields messages in send order. Values are JSON-encoded [`StoredMessage`]s
//! naming the queue the envelope belongs to.

use serde::{Deserialize, Serialize};
use sled::{Batch, Db, Tree};
use tracing::warn;

use crate::message::Envelope;
use crate::utils::error::{ConnectionError, MessagingError};

const JOURNAL_TREE: &str = "journal";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredMessage {
    pub queue: String,
    pub envelope: Envelope,
}

#[derive(Clone)]
pub struct Persistence {
    db: Db,
    journal: Tree,
    #[cfg(test)]
    fail_writes: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl Persistence {
    /// Open or create a journal at `path`.
    pub fn new(path: &str) -> Result<Self, MessagingError> {
        Self::from_db(sled::open(path)?)
    }

    /// A journal that is deleted when the last handle is dropped.
    pub fn temporary() -> Result<Self, MessagingError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, MessagingError> {
        let journal = db.open_tree(JOURNAL_TREE)?;
        Ok(Self {
            db,
            journal,
            #[cfg(test)]
            fail_writes: Default::default(),
        })
    }

    /// Makes every later batch write fail, on this handle and its clones.
    #[cfg(test)]
    pub(crate) fn fail_writes(&self) {
        self.fail_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Writes all entries in one atomic batch and flushes to disk.
    pub fn store_batch(&self, entries: &[(u64, StoredMessage)]) -> Result<(), ConnectionError> {
        if entries.is_empty() {
            return Ok(());
        }
        #[cfg(test)]
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ConnectionError::new("journal write failed: writes disabled"));
        }

        let mut batch = Batch::default();
        for (seq, message) in entries {
            let serialized = serde_json::to_vec(message)
                .map_err(|e| ConnectionError::new(format!("journal encoding failed: {e}")))?;
            batch.insert(seq.to_be_bytes().to_vec(), serialized);
        }

        self.journal.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn remove(&self, seq: u64) -> Result<(), ConnectionError> {
        self.journal.remove(seq.to_be_bytes())?;
        Ok(())
    }

    /// All journaled messages in sequence order. Unreadable entries are
    /// skipped with a warning.
    pub fn load_messages(&self) -> Result<Vec<(u64, StoredMessage)>, MessagingError> {
        let mut messages = Vec::new();
        for entry in self.journal.iter() {
            let (key, value) = entry?;
            let Ok(key) = <[u8; 8]>::try_from(key.as_ref()) else {
                warn!("Skipping journal entry with malformed key");
                continue;
            };
            match serde_json::from_slice::<StoredMessage>(&value) {
                Ok(message) => messages.push((u64::from_be_bytes(key), message)),
                Err(e) => warn!("Skipping unreadable journal entry: {e}"),
            }
        }
        Ok(messages)
    }

    pub fn len(&self) -> usize {
        self.journal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.journal.is_empty()
    }

    pub fn flush(&self) -> Result<(), ConnectionError> {
        self.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("db", &"sled::Db")
            .field("entries", &self.journal.len())
            .finish()
    }
}

//! Durable, crash-safe admission state.
//!
//! Three JSON records (attempts, global counter, approval grant) live in
//! one directory and are only ever touched inside [`StateStore::with_lock`],
//! which holds an exclusive cross-process lock, reloads from disk, and
//! persists changed records with write-temp-then-rename before unlocking.

mod lock;
mod state_set;
mod state_store;

pub use lock::StateLock;
pub use state_set::StateSet;
pub use state_store::{APPROVAL_FILE, ATTEMPTS_FILE, GLOBAL_FILE, LOCK_FILE, StateStore};

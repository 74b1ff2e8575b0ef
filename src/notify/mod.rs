//! One-shot escalation messages.
//!
//! The notifier renders threshold-crossing events and hands them to a
//! transport. Sending is fire-and-forget: failures are logged, never
//! propagated. De-duplication is the caller's job and is persisted with
//! the admission state.

mod notifier;
mod transport;

pub use notifier::{Notification, Notifier};
pub use transport::{CommandTransport, LogTransport, Message, NotificationTransport, RecordingTransport};

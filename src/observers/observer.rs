//! # Observe: user-facing notice handlers.
//!
//! The [`Observe`] trait is the extension point for watching the engine.
//! Every [`Notice`] published on the bus is forwarded to each observer through
//! its own bounded queue, so a slow observer never stalls delivery.
//!
//! ```text
//! Worker / Hub / Engine ── publish(Notice) ──► Bus ──► observer listener
//!                                                         └─► ObserverSet::emit
//!                                                               ├─► LogWriter
//!                                                               └─► CustomObserver
//! ```
//!
//! # Example
//! ```no_run
//! use async_trait::async_trait;
//! use capnotify::{Notice, NoticeKind, Observe};
//!
//! struct DeadLetterAlert;
//!
//! #[async_trait]
//! impl Observe for DeadLetterAlert {
//!     async fn on_notice(&self, notice: &Notice) {
//!         if notice.kind == NoticeKind::DeadLettered {
//!             eprintln!("dead letters for {:?}", notice.subscription);
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "dead-letter-alert"
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Notice;

/// Receives engine notices.
#[async_trait]
pub trait Observe: Send + Sync + 'static {
    /// Called for every notice, in publish order.
    async fn on_notice(&self, notice: &Notice);

    /// Name used in overflow and panic notices.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this observer's queue (at least 1).
    fn queue_capacity(&self) -> usize {
        1024
    }
}

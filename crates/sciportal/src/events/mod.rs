//! Lifecycle notifications.
//!
//! The coordinator publishes typed [`PortalEvent`]s on an [`EventBus`];
//! presentation code is the only subscriber.

mod bus;
mod types;

pub use bus::{EventBus, SubscriptionId};
pub use types::PortalEvent;

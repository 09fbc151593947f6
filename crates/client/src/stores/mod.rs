//! Session-scoped client state.

pub mod notifications;

pub use notifications::{NotificationStore, NotificationsHandle};

//! The canonical objects passed between the store, the providers, and the
//! conversation engine.
//!
//! Every provider speaks its own wire format, and the browser only ever sees
//! rendered HTML; these internal models are the one shape everything converts
//! to and from.
pub mod chat;
pub mod content;
pub mod message;
pub mod role;

pub use chat::Chat;
pub use content::Content;
pub use message::Message;
pub use role::Role;

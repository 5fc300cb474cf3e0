//! Storage collaborator interface.
//!
//! The messaging core never talks to a database directly; it reaches message,
//! thread, recipient and group state through the traits in [`store`]. An
//! in-memory implementation is provided for tests/dev.

pub mod error;
pub mod in_memory;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use in_memory::InMemoryStorage;
pub use store::{AccountStore, GroupStore, MessageStore, MessagingStore, RecipientStore, ThreadStore};

//! Client-side session identity.
//!
//! A visitor gets a stable anonymous id the first time their client has none.
//! The id lives in durable client storage under a single key and survives
//! restarts until it is explicitly cleared. Signing in later binds an account
//! to the same session without discarding the anonymous id.
//!
//! - [`SessionIdentity`]: the `get_or_create` / `clear` / `current` store
//! - [`SessionStorage`]: durable key/value backend, with [`FileStorage`] and
//!   [`MemoryStorage`] implementations

mod storage;
mod store;

pub use storage::{FileStorage, MemoryStorage, SessionStorage};
pub use store::{CurrentSession, DEFAULT_STORAGE_KEY, Session, SessionIdentity};

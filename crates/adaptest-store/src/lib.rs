//! adaptest-store — Session stores for the adaptive testing engine.
//!
//! Both stores implement [`SessionStore`] with version counters:
//! a save succeeds only against the version it was loaded at, so concurrent
//! load → mutate → save cycles surface as
//! [`CatError::VersionConflict`](adaptest_core::CatError::VersionConflict)
//! instead of losing an update.

pub mod file;
pub mod memory;

pub use adaptest_core::traits::{SessionStore, StoredSession};
pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

//! Storage layer for the credential service.
//!
//! Each store is a trait with an in-memory implementation (tests, single-node
//! development) and a Postgres implementation.

pub mod models;
pub mod postgres;
pub mod session;
pub mod users;
pub mod verification;

pub use models::{Channel, RefreshSession, User, VerificationCode};
pub use postgres::{PgSessionStore, PgStores, PgUserStore, PgVerificationStore};
pub use session::{MemorySessionStore, SessionStore};
pub use users::{MemoryUserStore, UserStore};
pub use verification::{MemoryVerificationStore, VerificationStore};

pub mod models;
pub mod queries;

pub use models::{Category, Identity, IdentityDescriptor, NewIdentity};
pub use queries::{init_db, DbPool, IdentityStore, SqliteIdentityStore};

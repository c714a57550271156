pub mod broker;
mod connection;
pub mod migrations;
pub mod store;

pub use broker::SqliteBroker;
pub use migrations::{SqliteMigration, current_schema_version, migration, migrations};
pub use store::SqliteStore;

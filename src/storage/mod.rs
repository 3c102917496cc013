mod delivery;
mod feeds;
mod schema;
mod types;

pub use delivery::SyncTransaction;
pub use schema::Database;
pub use types::{DeliveredItem, Feed, StoreError};

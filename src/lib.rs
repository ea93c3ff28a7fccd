pub mod engine;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod queue;
pub mod sql;
pub mod store;
pub mod tenant;
pub mod time;
pub mod watcher;
pub mod wire;

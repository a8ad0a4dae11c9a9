pub mod api;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod executor;
pub mod observability;
pub mod proto;
pub mod queue;
pub mod registry;
pub mod shutdown;
pub mod transfer;
pub mod unpack;
pub mod worker;

//! Execution substrates
//!
//! - [`TaskBroker`] over [`FjallQueue`]: persisted, in-process worker pool
//! - [`RedisQueue`] / [`RedisConsumer`]: Redis list feeding `worker` processes

pub mod broker;
pub mod redis_list;
pub mod store;

pub use broker::{TaskBroker, TaskEnvelope};
pub use redis_list::{RedisConsumer, RedisQueue, RedisQueueError};
pub use store::{FjallQueue, QueueError};

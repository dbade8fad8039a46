//! The primitive-handle layer (SPEC_FULL §B "Global state"/"Inheritance
//! tree"): thin, `Client`-constructed wrappers over the server-side
//! protocols in `core::scripts` plus `core::batch`/`core::transaction`.
//! Holder/permit id generation and lease defaults live here so the core
//! protocol types stay free of any notion of "the caller's current
//! process identity."

pub mod batch;
pub mod blocking;
pub mod executor_service;
pub mod fair_lock;
pub mod lock;
pub mod map;
pub mod priority_queue;
pub mod rate_limiter;
pub mod reliable_topic;
pub mod semaphore;
pub mod topic;
pub mod transaction;

pub use batch::BatchHandle;
pub use executor_service::ExecutorServiceHandle;
pub use fair_lock::FairLockHandle;
pub use lock::LockHandle;
pub use map::MapCacheHandle;
pub use priority_queue::PriorityQueueHandle;
pub use rate_limiter::RateLimiterHandle;
pub use reliable_topic::ReliableTopicHandle;
pub use semaphore::SemaphoreHandle;
pub use topic::TopicHandle;
pub use transaction::TransactionHandle;

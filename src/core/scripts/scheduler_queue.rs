//! Scheduled executor queue (spec §4.6.6): task submission, the
//! queue-transfer sweep run by C8, and cancellation.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use uuid::Uuid;

use crate::core::errors::ClientError;
use crate::core::executor::Executor;
use crate::core::keys;
use crate::core::protocol::command::RouteKey;
use crate::core::protocol::decode::{decode_bulk_array, decode_integer};
use crate::core::scripts::lua;

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Shutdown,
    Terminated,
}

impl TaskStatus {
    fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Shutdown => "shutdown",
            TaskStatus::Terminated => "terminated",
        }
    }
}

/// The server-side scheduler backing one executor service (spec §4.6.6).
pub struct SchedulerQueue {
    executor: Arc<Executor>,
    name: String,
}

impl SchedulerQueue {
    pub fn new(executor: Arc<Executor>, name: impl Into<String>) -> Self {
        Self { executor, name: name.into() }
    }

    fn scheduler_set_key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::aux(&self.name, "scheduled").as_bytes())
    }

    fn live_list_key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::aux(&self.name, "live").as_bytes())
    }

    fn task_hash_key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::aux(&self.name, "tasks").as_bytes())
    }

    fn counter_key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::aux(&self.name, "counter").as_bytes())
    }

    fn status_key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::aux(&self.name, "status").as_bytes())
    }

    fn channel(&self) -> Bytes {
        Bytes::copy_from_slice(keys::channel(&self.name).as_bytes())
    }

    fn cancel_flag_key(&self, task_id: &str) -> Bytes {
        Bytes::copy_from_slice(keys::aux(&self.name, &format!("cancel:{task_id}")).as_bytes())
    }

    /// Submits a task record, due either immediately or at `start_time`.
    /// Returns the generated task id. Submission after a `shutdown` call
    /// is rejected (spec §7 "rejected").
    pub async fn submit(&self, argument_bytes: Vec<u8>, start_time: Option<Duration>) -> Result<String, ClientError> {
        let status = self.status().await?;
        if status != TaskStatus::Running {
            return Err(ClientError::Rejected(format!("executor {} has shut down", self.name)));
        }

        let task_id = Uuid::new_v4().simple().to_string();
        let due_at = start_time.map(|d| d.as_millis() as i64).unwrap_or_else(now_millis);

        let task_hash_key = self.task_hash_key();
        self.executor
            .send_raw(
                "HSET",
                vec![task_hash_key.clone(), Bytes::copy_from_slice(task_id.as_bytes()), Bytes::from(argument_bytes)],
                RouteKey::Key(task_hash_key),
                false,
            )
            .await?;

        let scheduler_key = self.scheduler_set_key();
        self.executor
            .send_raw(
                "ZADD",
                vec![
                    scheduler_key.clone(),
                    Bytes::copy_from_slice(due_at.to_string().as_bytes()),
                    Bytes::copy_from_slice(task_id.as_bytes()),
                ],
                RouteKey::Key(scheduler_key),
                false,
            )
            .await?;

        self.executor
            .send_raw(
                "INCR",
                vec![self.counter_key()],
                RouteKey::Key(self.counter_key()),
                false,
            )
            .await?;

        Ok(task_id)
    }

    /// Re-enqueues a failed task with `"ff"` prefixed on its id to mark
    /// it as a retry (spec §4.6.6 "Retries re-enqueue... with a 'ff'
    /// prefix").
    pub async fn retry(&self, original_task_id: &str, argument_bytes: Vec<u8>, retry_interval: Duration) -> Result<String, ClientError> {
        let retry_id = format!("ff{original_task_id}");
        let due_at = now_millis() + retry_interval.as_millis() as i64;

        let task_hash_key = self.task_hash_key();
        self.executor
            .send_raw(
                "HSET",
                vec![task_hash_key.clone(), Bytes::copy_from_slice(retry_id.as_bytes()), Bytes::from(argument_bytes)],
                RouteKey::Key(task_hash_key),
                false,
            )
            .await?;

        let scheduler_key = self.scheduler_set_key();
        self.executor
            .send_raw(
                "ZADD",
                vec![
                    scheduler_key.clone(),
                    Bytes::copy_from_slice(due_at.to_string().as_bytes()),
                    Bytes::copy_from_slice(retry_id.as_bytes()),
                ],
                RouteKey::Key(scheduler_key),
                false,
            )
            .await?;

        Ok(retry_id)
    }

    /// Re-enqueues `task_id` at an absolute due time, keeping its id
    /// unchanged. Used for recurring tasks (fixed-rate/fixed-delay/cron),
    /// where each run is the same logical task rather than a distinct
    /// retry of a failure.
    pub async fn reschedule(&self, task_id: &str, argument_bytes: Vec<u8>, due_at_ms: i64) -> Result<(), ClientError> {
        let task_hash_key = self.task_hash_key();
        self.executor
            .send_raw(
                "HSET",
                vec![task_hash_key.clone(), Bytes::copy_from_slice(task_id.as_bytes()), Bytes::from(argument_bytes)],
                RouteKey::Key(task_hash_key),
                false,
            )
            .await?;

        let scheduler_key = self.scheduler_set_key();
        self.executor
            .send_raw(
                "ZADD",
                vec![
                    scheduler_key.clone(),
                    Bytes::copy_from_slice(due_at_ms.to_string().as_bytes()),
                    Bytes::copy_from_slice(task_id.as_bytes()),
                ],
                RouteKey::Key(scheduler_key),
                false,
            )
            .await?;

        Ok(())
    }

    /// Atomically moves due entries into the live work list, republishing
    /// the next earliest score so sleepers wake (spec §4.6.6
    /// "queue-transfer task").
    pub async fn transfer_due(&self) -> Result<Vec<Bytes>, ClientError> {
        let scheduler_key = self.scheduler_set_key();
        let frame = crate::core::scripts::eval_cached(
            &self.executor,
            lua::SCHEDULER_QUEUE_TRANSFER,
            vec![scheduler_key.clone(), self.live_list_key(), self.channel()],
            vec![Bytes::copy_from_slice(now_millis().to_string().as_bytes())],
            RouteKey::Key(scheduler_key),
        )
        .await?;
        decode_bulk_array(frame)
    }

    /// Atomically removes a task from the scheduler, live list, and task
    /// hash, or — if it was already dispatched — flips its per-task
    /// cancel-request flag for the worker to observe.
    pub async fn cancel(&self, task_id: &str) -> Result<bool, ClientError> {
        let scheduler_key = self.scheduler_set_key();
        let frame = crate::core::scripts::eval_cached(
            &self.executor,
            lua::SCHEDULER_QUEUE_CANCEL,
            vec![scheduler_key.clone(), self.live_list_key(), self.task_hash_key(), self.cancel_flag_key(task_id)],
            vec![Bytes::copy_from_slice(task_id.as_bytes())],
            RouteKey::Key(scheduler_key),
        )
        .await?;
        Ok(decode_integer(frame)? == 1)
    }

    /// Decrements the live-task counter; flips to `terminated` and
    /// publishes once it reaches zero during a shutdown.
    pub async fn complete(&self) -> Result<i64, ClientError> {
        let counter_key = self.counter_key();
        let frame = crate::core::scripts::eval_cached(
            &self.executor,
            lua::SCHEDULER_QUEUE_COMPLETE,
            vec![counter_key.clone(), self.status_key(), self.channel()],
            Vec::new(),
            RouteKey::Key(counter_key),
        )
        .await?;
        decode_integer(frame)
    }

    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let status_key = self.status_key();
        self.executor
            .send_raw(
                "SET",
                vec![status_key.clone(), Bytes::from_static(TaskStatus::Shutdown.as_str().as_bytes())],
                RouteKey::Key(status_key),
                false,
            )
            .await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<TaskStatus, ClientError> {
        let status_key = self.status_key();
        let frame = self
            .executor
            .send_raw("GET", vec![status_key.clone()], RouteKey::Key(status_key), true)
            .await?;
        match crate::core::protocol::decode::decode_bulk_opt(frame)? {
            None => Ok(TaskStatus::Running),
            Some(b) if b.as_ref() == b"shutdown" => Ok(TaskStatus::Shutdown),
            Some(b) if b.as_ref() == b"terminated" => Ok(TaskStatus::Terminated),
            Some(_) => Ok(TaskStatus::Running),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_ids_carry_the_ff_prefix() {
        assert!(format!("ff{}", "abc").starts_with("ff"));
    }

    #[test]
    fn task_status_round_trips_through_the_wire_strings() {
        assert_eq!(TaskStatus::Shutdown.as_str(), "shutdown");
        assert_eq!(TaskStatus::Terminated.as_str(), "terminated");
    }
}

use crate::types::{SubmissionJob, SubmissionRecord};
use redis::{AsyncCommands, RedisResult};

/// Redis queue contract between the domain service and the worker.
/// Keys are deterministic so both sides agree without coordination.

pub const QUEUE_KEY: &str = "crucible:queue:submissions";
pub const RESULT_PREFIX: &str = "crucible:result";

/// Records expire after 24 hours; the domain service persists them before then
pub const RESULT_TTL_SECONDS: u64 = 86400;

/// Generate result key for a submission
pub fn result_key(submission_id: &uuid::Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, submission_id)
}

fn serialization_error(e: serde_json::Error, what: &'static str) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, what, e.to_string()))
}

/// Push a submission onto the shared queue (RPUSH, FIFO with `pop_job`)
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    job: &SubmissionJob,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job)
        .map_err(|e| serialization_error(e, "serialization error"))?;

    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop a submission, blocking up to `timeout_seconds` so callers can notice shutdown
pub async fn pop_job(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<SubmissionJob>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let job: SubmissionJob = serde_json::from_str(&payload)
                .map_err(|e| serialization_error(e, "deserialization error"))?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

/// Store a finished submission record with the standard TTL
pub async fn store_record(
    conn: &mut redis::aio::ConnectionManager,
    record: &SubmissionRecord,
) -> RedisResult<()> {
    let key = result_key(&record.submission_id);
    let payload = serde_json::to_string(record)
        .map_err(|e| serialization_error(e, "serialization error"))?;

    conn.set_ex(&key, payload, RESULT_TTL_SECONDS as _).await
}

/// Retrieve a stored record, `None` while the submission is queued or running
pub async fn get_record(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &uuid::Uuid,
) -> RedisResult<Option<SubmissionRecord>> {
    let key = result_key(submission_id);
    let payload: Option<String> = conn.get(&key).await?;

    match payload {
        Some(data) => {
            let record: SubmissionRecord = serde_json::from_str(&data)
                .map_err(|e| serialization_error(e, "deserialization error"))?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_result_key_deterministic() {
        let id = Uuid::new_v4();
        let key1 = result_key(&id);
        let key2 = result_key(&id);
        assert_eq!(key1, key2);
        assert!(key1.starts_with("crucible:result:"));
        assert!(key1.contains(&id.to_string()));
    }

    #[test]
    fn test_queue_key_is_namespaced() {
        assert!(QUEUE_KEY.starts_with("crucible:"));
        assert_ne!(QUEUE_KEY, RESULT_PREFIX);
    }
}

//! Protobuf message types for the job queue
//!
//! `JobTask` is the unit handed from the dispatcher to the execution
//! substrate. It is encoded with prost both when persisted to the local
//! Fjall queue and when pushed onto the Redis list consumed by worker
//! processes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use jobrelay::proto::JobTask;
//! use prost::Message;
//!
//! let task = JobTask {
//!     job_id: "job-123".to_string(),
//!     client_id: "browser-1".to_string(),
//!     ..Default::default()
//! };
//!
//! let bytes = task.encode_to_vec();
//! let decoded = JobTask::decode(&bytes[..])?;
//! ```

use std::path::PathBuf;

/// A submitted job, as seen by the execution substrate
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JobTask {
    /// UUIDv7 assigned by the dispatcher
    #[prost(string, tag = "1")]
    pub job_id: String,
    /// Owner of the job; progress events are routed to this client
    #[prost(string, tag = "2")]
    pub client_id: String,
    /// Absolute paths of the staged input artifacts
    #[prost(string, repeated, tag = "3")]
    pub inputs: Vec<String>,
    /// Free-form processing parameters supplied by the client
    #[prost(string, tag = "4")]
    pub params: String,
    #[prost(uint64, tag = "5")]
    pub submitted_at_ms: u64,
    /// Directory holding this job's staged inputs
    #[prost(string, tag = "6")]
    pub staging_dir: String,
}

impl JobTask {
    pub fn input_paths(&self) -> Vec<PathBuf> {
        self.inputs.iter().map(PathBuf::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_job_task_wire_format() {
        let task = JobTask {
            job_id: "job-1".to_string(),
            client_id: "client-a".to_string(),
            inputs: vec!["/staging/job-1/a.txt".to_string()],
            params: "rule: width >= 3".to_string(),
            submitted_at_ms: 1_700_000_000_000,
            staging_dir: "/staging/job-1".to_string(),
        };

        let decoded = JobTask::decode(&task.encode_to_vec()[..]).unwrap();
        assert_eq!(decoded, task);
        assert_eq!(
            decoded.input_paths(),
            vec![PathBuf::from("/staging/job-1/a.txt")]
        );
    }
}

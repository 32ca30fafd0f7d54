// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Activity input and output shapes exchanged with the workflow engine.
//!
//! These mirror the JSON Harbinger's playbook runner produces; all structs
//! tolerate missing fields so schema drift degrades instead of failing.

use serde::{Deserialize, Serialize};

/// A Harbinger file attached to a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobFile {
    pub id: String,
    pub filename: String,
    pub bucket: String,
    pub path: String,
}

/// The job half of a [`RunJob`] input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct C2Job {
    pub id: String,
    pub command: String,
    /// JSON-encoded [`JobArguments`].
    pub arguments: String,
    pub input_files: Vec<JobFile>,
}

/// The implant half of a [`RunJob`] input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct C2Implant {
    pub internal_id: String,
    pub architecture: String,
    pub c2_type: String,
    pub os: String,
    pub payload_type: String,
}

/// Input of the `run_job` activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunJob {
    pub c2_job: C2Job,
    pub c2_implant: C2Implant,
}

/// Output of `run_job` and input of `wait_for_task`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct C2Task {
    pub internal_id: String,
    pub internal_implant_id: String,
    pub id: String,
    pub status: String,
    pub c2_server_id: String,
}

/// Output of `wait_for_task`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowStepResult {
    pub id: String,
    pub status: String,
    pub proxy_id: String,
    pub output: String,
    pub label: String,
}

/// A file registered with the C2, ready to be referenced by a task.
#[derive(Debug, Clone, Default)]
pub struct StagedFile {
    pub id: String,
    pub name: String,
}

/// The abstract arguments Harbinger attaches to a job, decoded from
/// [`C2Job::arguments`]. Which fields are meaningful depends on the command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobArguments {
    pub sleep: Option<i64>,
    pub jitter: Option<i64>,
    pub file: String,
    pub remotename: String,
    pub path: String,
    pub host: String,
    #[serde(rename = "arguments_str")]
    pub arguments: String,
    pub safe: bool,
    pub source: String,
    pub dest: String,
    pub port: Option<i64>,
    pub action: String,
    pub command: String,
    pub folder: String,
    pub destination: String,
    pub filename: String,
    pub cmdline: String,
    pub hwbp: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_job_decodes_partial_input() {
        let raw = serde_json::json!({
            "c2_job": {
                "id": "job-1",
                "command": "ls",
                "arguments": "{\"path\": \"/tmp\"}"
            },
            "c2_implant": {
                "internal_id": "12",
                "payload_type": "apollo"
            }
        });

        let job: RunJob = serde_json::from_value(raw).unwrap();
        assert_eq!(job.c2_job.command, "ls");
        assert!(job.c2_job.input_files.is_empty());
        assert_eq!(job.c2_implant.payload_type, "apollo");

        let arguments: JobArguments = serde_json::from_str(&job.c2_job.arguments).unwrap();
        assert_eq!(arguments.path, "/tmp");
        assert!(arguments.sleep.is_none());
    }

    #[test]
    fn job_arguments_read_arguments_str_key() {
        let arguments: JobArguments =
            serde_json::from_str(r#"{"arguments_str": "pid:1234 verbose:1"}"#).unwrap();
        assert_eq!(arguments.arguments, "pid:1234 verbose:1");
    }
}

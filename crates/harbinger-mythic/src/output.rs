// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task-output decoding.
//!
//! Mythic agents deliver `response_text` base64-encoded, and for some agents
//! the payload inside is base64 again. The decoder peels at most two layers;
//! the first failed decode keeps the last good value, so base64-looking
//! plaintext can never loop. Structured bodies (`ps` process lists, `ls`
//! directory listings) are parsed opportunistically; a parse failure logs and
//! the textual body is forwarded unchanged.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use harbinger_proto::harbinger::{FileList, Process, ShareFile, TaskOutputRequest};
use mythic_client::TaskOutput;
use serde::Deserialize;
use tracing::warn;

/// Peel up to two layers of base64 from a response body.
pub fn decode_response_text(raw: &str) -> String {
    let mut message = raw.to_string();
    for _ in 0..2 {
        match BASE64.decode(message.as_bytes()) {
            Ok(decoded) => match String::from_utf8(decoded) {
                Ok(text) => message = text,
                Err(_) => break,
            },
            Err(_) => break,
        }
    }
    message
}

#[derive(Debug, Deserialize)]
struct ProcessRecord {
    #[serde(default)]
    process_id: i32,
    #[serde(default)]
    architecture: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    bin_path: String,
    #[serde(default)]
    parent_process_id: i32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileEntry {
    is_file: bool,
    name: String,
    size: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DirectoryListing {
    host: String,
    name: String,
    parent_path: String,
    size: i64,
    access_time: i64,
    creation_time: i64,
    modify_time: i64,
    files: Vec<FileEntry>,
}

fn parse_processes(message: &str) -> Vec<Process> {
    let records: Vec<ProcessRecord> = match serde_json::from_str(message) {
        Ok(records) => records,
        Err(err) => {
            warn!(error = %err, "error processing processes");
            return Vec::new();
        }
    };

    records
        .into_iter()
        .map(|record| Process {
            process_id: record.process_id,
            architecture: record.architecture,
            name: record.name,
            user: record.user,
            bin_path: record.bin_path,
            parent_process_id: record.parent_process_id,
        })
        .collect()
}

fn parse_file_list(message: &str) -> Option<FileList> {
    let listing: DirectoryListing = match serde_json::from_str(message) {
        Ok(listing) => listing,
        Err(err) => {
            warn!(error = %err, "error parsing file list");
            return None;
        }
    };

    // The per-entry timestamps mirror the listing's own; agents only report
    // them at the directory level.
    let files = listing
        .files
        .iter()
        .map(|file| ShareFile {
            r#type: if file.is_file { "file" } else { "dir" }.to_string(),
            size: file.size,
            last_accessed: listing.access_time.to_string(),
            last_modified: listing.modify_time.to_string(),
            created: listing.creation_time.to_string(),
            name: file.name.clone(),
        })
        .collect();

    Some(FileList {
        host: listing.host,
        name: listing.name,
        parent_path: listing.parent_path,
        size: listing.size,
        last_accessed: listing.access_time.to_string(),
        last_modified: listing.modify_time.to_string(),
        created: listing.creation_time.to_string(),
        files,
    })
}

/// Translate one Mythic output record into a Harbinger upsert.
pub fn output_request(c2_server_id: &str, output: &TaskOutput) -> TaskOutputRequest {
    let message = decode_response_text(&output.response_text);

    let processes = if output.task.command_name == "ps" {
        parse_processes(&message)
    } else {
        Vec::new()
    };

    let file_list = if output.task.command_name == "ls" && message.starts_with('{') {
        parse_file_list(&message)
    } else {
        None
    };

    TaskOutputRequest {
        internal_id: output.id.to_string(),
        c2_server_id: c2_server_id.to_string(),
        response_text: message,
        timestamp: output.timestamp.clone(),
        internal_task_id: output.task.id.to_string(),
        processes,
        file_list,
    }
}

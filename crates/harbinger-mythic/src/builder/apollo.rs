// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task builder for the Apollo payload family.
//!
//! Most commands are a single task whose arguments are a plain string.
//! In-process payloads (`runassembly`, `runbof`) expand to a register step
//! followed by an execute step; the register step must complete before the
//! execute step is issued.

use serde::Serialize;

use super::{BuiltTask, TaskBuilder};
use crate::error::{BridgeError, Result};
use crate::jobs::{JobArguments, RunJob, StagedFile};

/// Arguments in the JSON shape Apollo's structured commands expect.
#[derive(Debug, Default, Serialize)]
struct ApolloArguments {
    #[serde(skip_serializing_if = "String::is_empty")]
    file: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    remote_path: String,
    #[serde(rename = "coff_name", skip_serializing_if = "String::is_empty")]
    coff: String,
    #[serde(rename = "function_name", skip_serializing_if = "String::is_empty")]
    function: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    timeout: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    coff_arguments: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    assembly_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    assembly_arguments: String,
}

/// Split a raw argument string into COFF argument pairs: whitespace-separated
/// tokens, each split on the first `:` and prefixed with `-`.
fn parse_coff_arguments(raw: &str) -> Vec<Vec<String>> {
    raw.split_whitespace()
        .map(|token| {
            let flagged = format!("-{token}");
            flagged.splitn(2, ':').map(str::to_string).collect()
        })
        .collect()
}

pub struct ApolloBuilder;

impl TaskBuilder for ApolloBuilder {
    fn build(&self, job: &RunJob, files: &[StagedFile]) -> Result<Vec<BuiltTask>> {
        let mut input: JobArguments = serde_json::from_str(&job.c2_job.arguments)?;
        if let Some(first) = files.first() {
            input.file = first.id.clone();
        }

        let mut tasks = Vec::new();
        let mut command = job.c2_job.command.clone();

        let arguments = match job.c2_job.command.as_str() {
            "ls" | "rm" | "cd" | "mkdir" => input.path.clone(),
            "download" => format!("-Path {}", input.path),
            "sleep" => format!(
                "{} {}",
                input.sleep.unwrap_or_default(),
                input.jitter.unwrap_or_default()
            ),
            "upload" => serde_json::to_string(&ApolloArguments {
                file: input.file.clone(),
                remote_path: input.remotename.clone(),
                host: input.host.clone(),
                ..ApolloArguments::default()
            })?,
            "runassembly" => {
                let first = files.first().ok_or(BridgeError::MissingInputFile)?;
                tasks.push(BuiltTask {
                    command: "register_assembly".to_string(),
                    arguments: serde_json::to_string(&ApolloArguments {
                        file: input.file.clone(),
                        ..ApolloArguments::default()
                    })?,
                });
                command = "execute_assembly".to_string();
                serde_json::to_string(&ApolloArguments {
                    assembly_name: first.name.clone(),
                    assembly_arguments: input.arguments.clone(),
                    ..ApolloArguments::default()
                })?
            }
            "runbof" => {
                let first = files.first().ok_or(BridgeError::MissingInputFile)?;
                tasks.push(BuiltTask {
                    command: "register_coff".to_string(),
                    arguments: serde_json::to_string(&ApolloArguments {
                        file: input.file.clone(),
                        ..ApolloArguments::default()
                    })?,
                });
                command = "execute_coff".to_string();
                serde_json::to_string(&ApolloArguments {
                    coff: first.name.clone(),
                    timeout: "1200".to_string(),
                    function: "go".to_string(),
                    coff_arguments: parse_coff_arguments(&input.arguments),
                    ..ApolloArguments::default()
                })?
            }
            "cp" | "mv" => format!("{} {}", input.source, input.destination),
            "runprocess" | "shell" => input.command.clone(),
            "socks" => input.port.unwrap_or_default().to_string(),
            // ps, pwd, exit, disableetw, disableamsi, unhook and anything
            // unrecognized go out without arguments.
            _ => String::new(),
        };

        tasks.push(BuiltTask { command, arguments });
        Ok(tasks)
    }
}

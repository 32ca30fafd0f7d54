// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Harbinger Proto - gRPC + Protobuf definitions for the C2 workers
//!
//! This crate provides the wire types for communication between:
//! - C2 workers and the Harbinger server (`harbinger` module)
//! - C2 workers and the workflow engine's task queue (`taskqueue` module)
//!
//! # Protocols
//!
//! ## Harbinger Protocol (`harbinger`)
//!
//! The ingestion surface C2 workers push mirrored state into:
//! - Settings lookup for a C2 server id
//! - Idempotent entity upserts (implants, tasks, task output, proxies, files)
//! - File existence checks and chunked file transfer in both directions
//! - Worker status reporting
//!
//! ## Task Queue Protocol (`taskqueue`)
//!
//! The workflow engine's activity dispatch surface:
//! - Long-poll for activity tasks on a named queue
//! - Report activity completion or failure

/// Generated types for the `harbinger.v1` package.
pub mod harbinger {
    tonic::include_proto!("harbinger.v1");
}

/// Generated types for the `taskqueue.v1` package.
pub mod taskqueue {
    tonic::include_proto!("taskqueue.v1");
}

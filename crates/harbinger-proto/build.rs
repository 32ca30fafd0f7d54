// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
use std::io::Result;

fn main() -> Result<()> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());
    }

    // Compile the Harbinger service (consumed as a client by the C2 workers)
    // and the task queue service (the workflow engine's activity dispatch
    // surface). Server stubs are generated too so tests can run in-process
    // servers.
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(
            &["proto/harbinger.proto", "proto/taskqueue.proto"],
            &["proto/"],
        )?;

    Ok(())
}

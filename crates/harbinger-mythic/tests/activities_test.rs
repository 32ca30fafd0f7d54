// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the workflow activities against in-process
//! Harbinger and Mythic servers.

mod common;

use std::sync::Arc;

use common::*;
use harbinger_mythic::activities::MythicBridge;
use harbinger_mythic::harbinger::HarbingerClient;
use harbinger_mythic::jobs::{C2Implant, C2Job, C2Task, JobFile, RunJob};
use harbinger_mythic::readers::{
    read_callbacks, read_proxies, read_task_output, read_tasks, Channels, CHANNEL_CAPACITY,
};
use mythic_client::MythicClient;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Harness {
    bridge: Arc<MythicBridge>,
    harbinger_state: Arc<HarbingerState>,
    mythic_state: Arc<MythicState>,
    mythic: Arc<MythicClient>,
    cancel: CancellationToken,
}

/// Wire a bridge with live readers for tasks, outputs, callbacks and
/// proxies; checkin and download channels are left idle.
async fn harness() -> Harness {
    let harbinger_state = Arc::new(HarbingerState::default());
    let mythic_state = Arc::new(MythicState::default());

    let host = spawn_harbinger(harbinger_state.clone()).await;
    let harbinger = HarbingerClient::connect(&host).await.unwrap();
    let port = spawn_mythic(mythic_state.clone()).await;
    let mythic = Arc::new(
        MythicClient::login_plaintext("127.0.0.1", port, "user", "pass")
            .await
            .unwrap(),
    );

    let cancel = CancellationToken::new();

    let (task_tx, task_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (output_tx, output_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (callback_tx, callback_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (checkin_tx, _checkin_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (proxy_tx, proxy_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (download_tx, _download_rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(read_tasks(
        HarbingerClient::connect(&host).await.unwrap(),
        "c2-1".to_string(),
        task_rx,
        cancel.clone(),
    ));
    tokio::spawn(read_task_output(
        HarbingerClient::connect(&host).await.unwrap(),
        "c2-1".to_string(),
        output_rx,
        cancel.clone(),
    ));
    tokio::spawn(read_callbacks(
        HarbingerClient::connect(&host).await.unwrap(),
        "c2-1".to_string(),
        callback_rx,
        cancel.clone(),
    ));
    tokio::spawn(read_proxies(
        HarbingerClient::connect(&host).await.unwrap(),
        "c2-1".to_string(),
        "mythic.local".to_string(),
        proxy_rx,
        cancel.clone(),
    ));

    let channels = Channels {
        tasks: task_tx,
        outputs: output_tx,
        callbacks: callback_tx,
        checkins: checkin_tx,
        proxies: proxy_tx,
        downloads: download_tx,
    };

    let bridge = Arc::new(MythicBridge::new(
        mythic.clone(),
        harbinger,
        "c2-1".to_string(),
        channels,
        cancel.clone(),
    ));

    Harness {
        bridge,
        harbinger_state,
        mythic_state,
        mythic,
        cancel,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_all_feeds_every_entity_kind() {
    let h = harness().await;

    {
        let mut graphql = h.mythic_state.graphql.lock();
        graphql.insert(
            "AllCallbacks",
            json!({"callback": [{
                "id": 12, "display_id": 3, "host": "WS01", "os": "Windows",
                "pid": 4412, "user": "corp\\alice",
                "payload": {"payloadtype": {"name": "apollo"}}
            }]}),
        );
        graphql.insert(
            "CurrentTasks",
            json!({"task": [{
                "id": 55, "display_id": 7,
                "callback": {"id": 12, "display_id": 3},
                "operator": {"username": "operator1"},
                "status": "success", "completed": true,
                "command_name": "shell"
            }]}),
        );
        graphql.insert(
            "OutputForTask",
            json!({"response": [{
                "id": 9, "timestamp": "2025-05-01T10:00:00",
                "response_text": "dG90YWwgMA==",
                "task": {"id": 55, "command_name": "shell",
                          "callback": {"id": 12, "display_id": 3}}
            }]}),
        );
        graphql.insert(
            "Proxies",
            json!({"callbackport": [{
                "id": 3, "deleted": false, "local_port": 7001,
                "port_type": "socks", "callback": {"host": "WS01"}
            }]}),
        );
        graphql.insert("FileDownloads", json!({"filemeta": []}));
    }

    h.bridge.sync_all().await.unwrap();

    wait_until(|| {
        h.harbinger_state.implants.lock().len() == 1
            && h.harbinger_state.tasks.lock().len() == 1
            && h.harbinger_state.outputs.lock().len() == 1
            && h.harbinger_state.proxies.lock().len() == 1
    })
    .await;

    assert_eq!(h.harbinger_state.implants.lock()[0].hostname, "WS01");
    assert_eq!(h.harbinger_state.tasks.lock()[0].internal_id, "55");
    // The single base64 layer is peeled during translation.
    assert_eq!(h.harbinger_state.outputs.lock()[0].response_text, "total 0");
    assert_eq!(h.harbinger_state.proxies.lock()[0].status, "connected");

    h.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn single_step_job_issues_once_and_returns_status() {
    let h = harness().await;

    {
        let mut graphql = h.mythic_state.graphql.lock();
        graphql.insert("CallbackDisplayId", json!({"callback_by_pk": {"display_id": 3}}));
        graphql.insert(
            "IssueTask",
            json!({"createTask": {"id": 101, "display_id": 9, "status": "submitted", "error": ""}}),
        );
    }

    let job = RunJob {
        c2_job: C2Job {
            id: "job-1".to_string(),
            command: "ls".to_string(),
            arguments: json!({"path": "/tmp"}).to_string(),
            input_files: Vec::new(),
        },
        c2_implant: C2Implant {
            internal_id: "12".to_string(),
            payload_type: "apollo".to_string(),
            ..C2Implant::default()
        },
    };

    let task = h.bridge.run_job(job).await.unwrap();
    assert_eq!(task.internal_id, "101");
    assert_eq!(task.internal_implant_id, "12");
    assert_eq!(task.c2_server_id, "c2-1");
    assert_eq!(task.status, "submitted");

    // One mutation, addressed to the resolved display id; no intermediate
    // wait happened because the job was a single step.
    let issued = h.mythic_state.issued.lock();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0]["callback_id"], 3);
    assert_eq!(issued[0]["command"], "ls");
    assert_eq!(issued[0]["params"], "/tmp");

    h.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn multi_step_job_waits_between_steps() {
    let h = harness().await;

    // The registered file resolves to agent-file-1; the first issued task
    // (101) completes upstream, unblocking the second step.
    {
        let mut graphql = h.mythic_state.graphql.lock();
        graphql.insert("CallbackDisplayId", json!({"callback_by_pk": {"display_id": 3}}));
        graphql.insert(
            "IssueTask",
            json!({"createTask": {"id": 101, "display_id": 9, "status": "submitted", "error": ""}}),
        );
    }
    h.harbinger_state
        .stored_files
        .lock()
        .insert("hb-file-1".to_string(), b"coff bytes".to_vec());
    h.mythic_state.ws_tasks.lock().push(json!({
        "id": 101, "display_id": 9,
        "callback": {"id": 12, "display_id": 3},
        "operator": {"username": "operator1"},
        "status": "success", "completed": true,
        "command_name": "register_coff"
    }));

    let multiplexer = {
        let mythic = h.mythic.clone();
        let cancel = h.cancel.clone();
        tokio::spawn(async move { mythic.run_subscriptions(cancel).await })
    };

    let job = RunJob {
        c2_job: C2Job {
            id: "job-2".to_string(),
            command: "runbof".to_string(),
            arguments: json!({"arguments_str": "pid:1234 verbose:1"}).to_string(),
            input_files: vec![JobFile {
                id: "hb-file-1".to_string(),
                filename: "a.o".to_string(),
                ..JobFile::default()
            }],
        },
        c2_implant: C2Implant {
            internal_id: "12".to_string(),
            payload_type: "apollo".to_string(),
            ..C2Implant::default()
        },
    };

    let task = h.bridge.run_job(job).await.unwrap();
    assert_eq!(task.status, "submitted");

    let issued = h.mythic_state.issued.lock();
    assert_eq!(issued.len(), 2);
    assert_eq!(issued[0]["command"], "register_coff");
    assert_eq!(issued[1]["command"], "execute_coff");

    let execute: serde_json::Value =
        serde_json::from_str(issued[1]["params"].as_str().unwrap()).unwrap();
    assert_eq!(execute["coff_name"], "a.o");
    assert_eq!(execute["function_name"], "go");
    assert_eq!(execute["timeout"], "1200");
    assert_eq!(
        execute["coff_arguments"],
        json!([["-pid", "1234"], ["-verbose", "1"]])
    );

    drop(issued);
    h.cancel.cancel();
    let _ = multiplexer.await;
}

#[tokio::test(flavor = "multi_thread")]
async fn wait_for_task_normalizes_success() {
    let h = harness().await;

    h.mythic_state.ws_tasks.lock().push(json!({
        "id": 55, "display_id": 7,
        "callback": {"id": 12, "display_id": 3},
        "operator": {"username": "operator1"},
        "status": "success", "completed": true,
        "command_name": "ls"
    }));

    let multiplexer = {
        let mythic = h.mythic.clone();
        let cancel = h.cancel.clone();
        tokio::spawn(async move { mythic.run_subscriptions(cancel).await })
    };

    let result = h
        .bridge
        .wait_for_task(C2Task {
            internal_id: "55".to_string(),
            id: "harbinger-task-id".to_string(),
            ..C2Task::default()
        })
        .await
        .unwrap();

    assert_eq!(result.status, "completed");
    assert_eq!(result.id, "harbinger-task-id");

    h.cancel.cancel();
    let _ = multiplexer.await;
}

#[tokio::test(flavor = "multi_thread")]
async fn wait_for_task_reports_interruption_on_cancel() {
    let h = harness().await;

    // No completion ever arrives; the socket stays open with no task items.
    let multiplexer = {
        let mythic = h.mythic.clone();
        let cancel = h.cancel.clone();
        tokio::spawn(async move { mythic.run_subscriptions(cancel).await })
    };

    let waiter = {
        let bridge = h.bridge.clone();
        tokio::spawn(async move {
            bridge
                .wait_for_task(C2Task {
                    internal_id: "999".to_string(),
                    ..C2Task::default()
                })
                .await
        })
    };

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    h.cancel.cancel();

    let result = waiter.await.unwrap();
    assert!(matches!(
        result,
        Err(harbinger_mythic::BridgeError::Interrupted)
    ));

    let _ = multiplexer.await;
}

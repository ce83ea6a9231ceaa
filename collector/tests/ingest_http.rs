use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum_server::Server;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use collector::core::config::Config;
use collector::core::routes::router;
use collector::core::state::CollectorState;
use collector::inventory::{HttpDcSource, Inventory};
use collector::model::storage::Storage;

use common::time_utils::utc_now_secs;

struct TestCollector {
    url: String,
    handle: JoinHandle<Result<()>>,
}

impl TestCollector {
    async fn spawn() -> Result<Self> {
        let state = CollectorState {
            storage: Arc::new(Storage::new(Config::default())),
            inventory: Arc::new(Inventory::new(
                HttpDcSource::new(None),
                None,
                Duration::from_secs(1),
                3600,
            )),
        };

        let app = router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr: SocketAddr = listener.local_addr()?;
        let url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            Server::from_tcp(listener.into_std()?)
                .serve(app.into_make_service())
                .await
                .map_err(anyhow::Error::from)
        });

        Ok(Self { url, handle })
    }

    fn shutdown(self) {
        self.handle.abort();
    }
}

fn stats_document(ts_sec: u64) -> serde_json::Value {
    json!({
        "timestamp": {"tv_sec": ts_sec, "tv_usec": 0},
        "procfs": {
            "vm": {"la": [7, 9, 12]},
            "net": {
                "net_interfaces": {
                    "eth0": {"receive": {"bytes": 1200}, "transmit": {"bytes": 900}},
                    "lo": {"receive": {"bytes": 5000}, "transmit": {"bytes": 5000}},
                },
            },
        },
        "backends": {
            "10": {
                "backend_id": 10,
                "backend": {
                    "base_stats": {"data-0.0": {"base_size": 512}},
                    "config": {
                        "blob_size": 1024,
                        "blob_size_limit": 2048,
                        "data": "/srv/storage/10/data",
                        "file": "",
                        "group": 83,
                    },
                    "dstat": {"error": 0, "read_ios": 100, "write_ios": 200},
                    "summary_stats": {
                        "base_size": 512,
                        "records_total": 40,
                        "records_removed": 4,
                    },
                    "vfs": {"bavail": 700, "blocks": 1000, "bsize": 4096, "fsid": 9001},
                },
                "io": {
                    "blocking": {"current_size": 0},
                    "nonblocking": {"current_size": 0},
                },
                "status": {
                    "defrag_state": 0,
                    "last_start": {"tv_sec": 1, "tv_usec": 0},
                    "read_only": false,
                    "state": 1,
                },
            },
        },
        "stats": {},
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ingest_and_query_flow() -> Result<()> {
    let server = TestCollector::spawn().await?;
    let client = Client::new();

    let node_key = "node1.example.com:1025:2";
    let now = utc_now_secs();

    // Push one stats document.
    let res = client
        .post(format!("{}/ingest/{}", server.url, node_key))
        .body(serde_json::to_vec(&stats_document(now))?)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    // Push metadata binding group 83 into couple 83:84.
    let blob = rmp_serde::to_vec(&json!({
        "version": 2,
        "couple": [83, 84],
        "namespace": "default",
        "frozen": false,
    }))?;
    for group_id in [83, 84] {
        let res = client
            .post(format!("{}/groups/{}/metadata", server.url, group_id))
            .body(blob.clone())
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::OK);
    }

    // The node shows up.
    let nodes = client
        .get(format!("{}/nodes", server.url))
        .send()
        .await?
        .text()
        .await?;
    assert!(nodes.contains("There are 1 nodes"), "{}", nodes);
    assert!(nodes.contains(node_key), "{}", nodes);

    let node_info: serde_json::Value = client
        .get(format!("{}/nodes/{}", server.url, node_key))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(node_info["la"], json!(7));
    assert_eq!(node_info["rx_bytes"], json!(1200));
    assert_eq!(node_info["tx_bytes"], json!(900));
    // No inventory worker configured: the resolver falls back to the host.
    assert_eq!(node_info["dc"], json!("node1.example.com"));

    // Backend projection carries the derived space accounting.
    let backend: serde_json::Value = client
        .get(format!("{}/backends/{}/10", server.url, node_key))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(backend["id"], json!(format!("{}/10", node_key)));
    assert_eq!(backend["group"], json!(83));
    assert_eq!(backend["status"], json!("OK"));
    assert_eq!(backend["total_space"], json!(2048));
    assert_eq!(backend["used_space"], json!(512));
    assert_eq!(backend["base_path"], json!("/srv/storage/10/data"));
    assert_eq!(backend["fs_id"], json!("node1.example.com/9001"));

    // Group and couple views.
    let group: serde_json::Value = client
        .get(format!("{}/groups/83", server.url))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(group["status"], json!("COUPLED"));
    assert_eq!(group["couple"], json!("83:84"));
    assert_eq!(group["namespace"], json!("default"));

    let couple: serde_json::Value = client
        .get(format!("{}/couples/83:84", server.url))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(couple["groups"], json!([83, 84]));
    // Group 84 never reported a backend.
    assert_eq!(couple["status"], json!("INIT"));

    // Filesystem view.
    let fs: serde_json::Value = client
        .get(format!("{}/fs/node1.example.com/9001", server.url))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(fs["total_space"], json!(4096000));
    assert_eq!(fs["status"], json!("OK"));

    let fs_backends = client
        .get(format!("{}/fs/node1.example.com/9001/backends", server.url))
        .send()
        .await?
        .text()
        .await?;
    assert!(fs_backends.contains("There are 1 backends"), "{}", fs_backends);

    // Summary counts every entity kind.
    let summary = client
        .get(format!("{}/summary", server.url))
        .send()
        .await?
        .text()
        .await?;
    assert!(summary.contains("1 nodes"), "{}", summary);
    assert!(summary.contains("1 backends"), "{}", summary);
    assert!(summary.contains("2 groups"), "{}", summary);
    assert!(summary.contains("1 couples"), "{}", summary);
    assert!(summary.contains("1 namespaces"), "{}", summary);

    // Snapshot renders a coherent cross-entity view.
    let snapshot: serde_json::Value = client
        .get(format!("{}/snapshot", server.url))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(snapshot["nodes"].as_array().unwrap().len(), 1);
    assert_eq!(snapshot["backends"].as_array().unwrap().len(), 1);
    assert_eq!(snapshot["groups"].as_array().unwrap().len(), 2);
    assert_eq!(snapshot["couples"].as_array().unwrap().len(), 1);

    server.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_stats_discard_the_batch() -> Result<()> {
    let server = TestCollector::spawn().await?;
    let client = Client::new();

    let node_key = "node2.example.com:1025:2";

    // A type mismatch on a recognised field rejects the whole document.
    let res = client
        .post(format!("{}/ingest/{}", server.url, node_key))
        .body(r#"{"timestamp": {"tv_sec": "oops"}}"#)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Nothing was applied.
    let res = client
        .get(format!("{}/nodes/{}", server.url, node_key))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // A bad node key is rejected up front.
    let res = client
        .post(format!("{}/ingest/not-a-node-key", server.url))
        .body("{}")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    server.shutdown();
    Ok(())
}

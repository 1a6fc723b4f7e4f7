use minectl_excavator::{ExcavatorClient, ExcavatorConnection, ExcavatorError};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
};

/// Minimal excavator API stand-in answering one connection
async fn mock_excavator() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            let id = request["id"].clone();
            let params = request["params"].as_array().cloned().unwrap_or_default();

            let response = match request["method"].as_str().unwrap() {
                "algorithm.add" if params[0] == "bogus" => {
                    json!({"id": id, "error": "Invalid algorithm"})
                }
                "worker.add" => json!({"id": id, "worker_id": 5, "error": null}),
                "worker.list" => json!({
                    "id": id,
                    "error": null,
                    "workers": [{
                        "worker_id": 5,
                        "device_id": 0,
                        "algorithms": [{"id": 0, "name": "equihash", "speed": 450.0}]
                    }]
                }),
                "info" => {
                    // Unsolicited line with a foreign id first
                    let stale = json!({"id": 9999, "error": null});
                    write.write_all(format!("{}\n", stale).as_bytes()).await.unwrap();
                    json!({"id": id, "version": "1.4.4", "error": null})
                }
                "quit" => {
                    let reply = json!({"id": id, "error": null});
                    write.write_all(format!("{}\n", reply).as_bytes()).await.unwrap();
                    break;
                }
                _ => json!({"id": id, "error": null}),
            };

            write
                .write_all(format!("{}\n", response).as_bytes())
                .await
                .unwrap();
        }
    });

    port
}

fn connection(port: u16) -> ExcavatorConnection {
    ExcavatorConnection::new(
        "127.0.0.1".to_string(),
        port,
        Duration::from_millis(500),
        Duration::from_millis(500),
    )
}

#[tokio::test]
async fn test_worker_lifecycle() {
    let port = mock_excavator().await;
    let client = ExcavatorClient::from_connection(connection(port));

    client.connect().await.unwrap();
    assert!(client.is_connected().await);

    client
        .subscribe("nhmp.eu.nicehash.com:3200", "wallet.worker")
        .await
        .unwrap();
    client.algorithm_add("equihash").await.unwrap();
    assert_eq!(client.worker_add("equihash", 0).await.unwrap(), 5);

    let workers = client.worker_list().await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].speeds(), vec![450.0]);

    client.quit().await.unwrap();
}

#[tokio::test]
async fn test_api_error_is_reported() {
    let port = mock_excavator().await;
    let client = ExcavatorClient::from_connection(connection(port));
    client.connect().await.unwrap();

    match client.algorithm_add("bogus").await {
        Err(ExcavatorError::Api { method, message }) => {
            assert_eq!(method, "algorithm.add");
            assert_eq!(message, "Invalid algorithm");
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_stale_responses_are_skipped() {
    let port = mock_excavator().await;
    let conn = connection(port);
    conn.connect().await.unwrap();

    let response = conn
        .send_request(minectl_excavator::ExcavatorRequest::info)
        .await
        .unwrap();
    assert_eq!(response.body["version"], "1.4.4");
}

#[tokio::test]
async fn test_connect_refused() {
    // Bind then drop to get a port nobody listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let conn = connection(port);
    assert!(conn.connect().await.is_err());
    assert!(!conn.is_connected().await);
}

#[tokio::test]
async fn test_closed_connection_drops_stream() {
    let port = mock_excavator().await;
    let client = ExcavatorClient::from_connection(connection(port));
    client.connect().await.unwrap();
    client.quit().await.unwrap();

    // Server has hung up; the next request fails and the stream is dropped
    assert!(client.worker_list().await.is_err());
    assert!(!client.is_connected().await);
}

//! Redis broker integration tests.
//!
//! Run with: cargo test -p relay-core --test redis_smoke --features redis -- --ignored --nocapture
//!
//! Requires: REDIS_URI env var or Redis on localhost:6379
//!
//! Keys are prefixed with a fresh instance id so runs do not collide.
#![cfg(feature = "redis")]

use std::sync::Arc;
use std::time::Duration;

use relay_core::impls::RedisBroker;
use relay_core::{Broker, HandlerError, InstanceId, RelayConfig, Service, handler_fn};
use serde_json::{Value, json};

fn redis_uri() -> String {
    std::env::var("REDIS_URI").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_broker_primitives() {
    let broker = RedisBroker::connect(&redis_uri())
        .await
        .expect("Failed to connect to Redis");
    let prefix = format!("test_{}", InstanceId::generate());
    let list = format!("{prefix}:list");
    let value = format!("{prefix}:value");

    broker.push(&list, b"a").await.unwrap();
    broker.push(&list, b"b").await.unwrap();
    assert_eq!(broker.list_members(&list).await.unwrap(), vec!["a", "b"]);

    let popped = broker
        .blocking_pop(&[list.clone()], Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(popped, Some((list.clone(), b"a".to_vec())));

    broker.remove_from_list(&list, "b").await.unwrap();
    let empty = broker
        .blocking_pop(&[list.clone()], Duration::from_millis(200))
        .await
        .unwrap();
    assert!(empty.is_none());

    broker
        .set_with_ttl(&value, b"v", Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(broker.get(&value).await.unwrap(), Some(b"v".to_vec()));
    broker.delete(&value).await.unwrap();
    assert_eq!(broker.get(&value).await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_echo_round_trip() {
    let broker = Arc::new(
        RedisBroker::connect(&redis_uri())
            .await
            .expect("Failed to connect to Redis"),
    );
    let node = InstanceId::generate();
    let client = InstanceId::generate();
    let queue = format!("smoke_{node}");
    let response_queue = format!("{queue}.out");

    broker
        .push(&format!("hooks:{response_queue}"), client.as_str().as_bytes())
        .await
        .unwrap();

    let config = RelayConfig {
        poll_timeout_ms: 200,
        ..RelayConfig::default()
    };
    let service = Arc::new(
        Service::builder(broker.clone(), config)
            .instance_id(node.as_str())
            .build()
            .await
            .unwrap(),
    );
    let echo = Arc::new(handler_fn(|obj, _meta| async move {
        Ok::<_, HandlerError>(json!({ "value": obj.get("value") }))
    }));
    service
        .register(&queue, echo, Some(&response_queue), None)
        .await
        .unwrap();

    let running = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.run_forever().await }
    });

    broker
        .push(
            &format!("{queue}:{node}"),
            br#"{"id":"1","tracking":null,"obj":{"value":null}}"#,
        )
        .await
        .unwrap();

    let delivery = format!("{response_queue}:{client}");
    let (_, bytes) = broker
        .blocking_pop(&[delivery], Duration::from_secs(5))
        .await
        .unwrap()
        .expect("response delivered");
    let response: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(response["obj"], json!({ "value": "" }));
    assert_eq!(response["status_code"], 200);

    service.shutdown_handle().shutdown();
    running.await.unwrap().unwrap();

    broker.delete(&format!("hooks:{response_queue}")).await.unwrap();
    broker.delete(&format!("hooks:{queue}")).await.unwrap();
}

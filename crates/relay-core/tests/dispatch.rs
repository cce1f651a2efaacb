//! End-to-end dispatch tests against the in-memory broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use relay_core::impls::InMemoryBroker;
use relay_core::{
    Broker, DecodeFailurePolicy, DynHandler, HandlerError, RelayConfig, RelayError, Service,
    handler_fn,
};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

fn config() -> RelayConfig {
    RelayConfig {
        poll_timeout_ms: 50,
        ..RelayConfig::default()
    }
}

async fn service(broker: &Arc<InMemoryBroker>, config: RelayConfig) -> Arc<Service> {
    let service = Service::builder(broker.clone(), config)
        .instance_id("n1")
        .build()
        .await
        .unwrap();
    Arc::new(service)
}

fn spawn_loop(service: &Arc<Service>) -> JoinHandle<Result<(), RelayError>> {
    let service = Arc::clone(service);
    tokio::spawn(async move { service.run_forever().await })
}

async fn next_message(broker: &InMemoryBroker, key: &str) -> Value {
    let (_, bytes) = broker
        .blocking_pop(&[key.to_string()], WAIT)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("nothing arrived on {key}"));
    serde_json::from_slice(&bytes).unwrap()
}

fn echo() -> Arc<dyn DynHandler> {
    Arc::new(handler_fn(|obj, _meta| async move {
        Ok::<_, HandlerError>(json!({ "value": obj.get("value") }))
    }))
}

fn tagged(tag: &'static str) -> Arc<dyn DynHandler> {
    Arc::new(handler_fn(move |_obj, _meta| async move {
        Ok::<_, HandlerError>(json!({ "tag": tag }))
    }))
}

#[tokio::test]
async fn echo_round_trip_normalizes_nulls() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.push("hooks:echo.out", b"client").await.unwrap();
    let service = service(&broker, config()).await;
    service
        .register("echo", echo(), Some("echo.out"), None)
        .await
        .unwrap();
    let running = spawn_loop(&service);

    broker
        .push("echo:n1", br#"{"id":"1","tracking":"t1","obj":{"value":null}}"#)
        .await
        .unwrap();

    let response = next_message(&broker, "echo.out:client").await;
    assert_eq!(
        response,
        json!({"id": "1", "tracking": "t1", "obj": {"value": ""}, "error": null, "status_code": 200})
    );

    service.shutdown_handle().shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn failing_handler_publishes_error_envelope_and_copy_to_error_queue() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.push("hooks:boom.out", b"client").await.unwrap();
    broker.push("hooks:msg:error", b"monitor").await.unwrap();
    let service = service(&broker, config()).await;
    let boom: Arc<dyn DynHandler> = Arc::new(handler_fn(|_obj, _meta| async move {
        Err::<Value, _>(HandlerError::new("always fails"))
    }));
    service
        .register("boom", boom, Some("boom.out"), Some("boom:result:"))
        .await
        .unwrap();
    let running = spawn_loop(&service);

    broker
        .push("boom:n1", br#"{"id":"7","tracking":null,"obj":{"a":1}}"#)
        .await
        .unwrap();

    let response = next_message(&broker, "boom.out:client").await;
    assert_eq!(response["status_code"], 500);
    assert_eq!(response["error"]["func"], "boom");
    assert_eq!(response["error"]["user_message"], "Something went wrong!");
    assert_eq!(response["error"]["msg_key"], "boom.out");

    let copy = next_message(&broker, "msg:error:monitor").await;
    assert_eq!(copy, response);

    let stored = broker.get("boom:result:7").await.unwrap().unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&stored).unwrap(), response);

    service.shutdown_handle().shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn second_registration_replaces_first() {
    let broker = Arc::new(InMemoryBroker::new());
    let service = service(&broker, config()).await;
    service
        .register("work", tagged("first"), None, Some("res:"))
        .await
        .unwrap();
    service
        .register("work", tagged("second"), None, Some("res:"))
        .await
        .unwrap();
    let running = spawn_loop(&service);

    broker
        .push("work:n1", br#"{"id":"1","obj":{}}"#)
        .await
        .unwrap();

    let mut stored = None;
    for _ in 0..100 {
        stored = broker.get("res:1").await.unwrap();
        if stored.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let stored: Value = serde_json::from_slice(&stored.expect("stored result")).unwrap();
    assert_eq!(stored["obj"], json!({"tag": "second"}));
    assert_eq!(broker.list_members("hooks:work").await.unwrap(), vec!["n1"]);

    service.shutdown_handle().shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn startup_removes_stale_registration_of_same_instance() {
    let broker = Arc::new(InMemoryBroker::new());
    for id in ["n1", "other", "n1"] {
        broker.push("hooks:X", id.as_bytes()).await.unwrap();
    }

    let service = service(&broker, config()).await;
    assert_eq!(broker.list_members("hooks:X").await.unwrap(), vec!["other"]);

    service.register("X", echo(), None, None).await.unwrap();
    assert_eq!(
        broker.list_members("hooks:X").await.unwrap(),
        vec!["other", "n1"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_never_exceed_capacity() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.push("hooks:slow.out", b"client").await.unwrap();
    let service = service(
        &broker,
        RelayConfig {
            max_concurrent_workers: 2,
            ..config()
        },
    )
    .await;

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let slow: Arc<dyn DynHandler> = Arc::new(handler_fn({
        let current = current.clone();
        let peak = peak.clone();
        move |_obj, meta| {
            let current = current.clone();
            let peak = peak.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(json!({ "done": meta.id }))
            }
        }
    }));
    service
        .register("slow", slow, Some("slow.out"), None)
        .await
        .unwrap();

    for i in 0..5 {
        let body = json!({"id": i.to_string(), "obj": {}}).to_string();
        broker.push("slow:n1", body.as_bytes()).await.unwrap();
    }
    let running = spawn_loop(&service);

    let mut done = Vec::new();
    for _ in 0..5 {
        let response = next_message(&broker, "slow.out:client").await;
        done.push(response["obj"]["done"].as_str().unwrap().to_string());
    }
    done.sort();
    assert_eq!(done, vec!["0", "1", "2", "3", "4"]);

    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
    assert!(service.active_workers() <= 2);

    service.shutdown_handle().shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_payload_is_dead_lettered_and_loop_continues() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.push("hooks:echo.out", b"client").await.unwrap();
    let service = service(&broker, config()).await;
    service
        .register("echo", echo(), Some("echo.out"), None)
        .await
        .unwrap();

    broker.push("echo:n1", b"not json").await.unwrap();
    broker
        .push("echo:n1", br#"{"id":"2","obj":{"value":"ok"}}"#)
        .await
        .unwrap();
    let running = spawn_loop(&service);

    let response = next_message(&broker, "echo.out:client").await;
    assert_eq!(response["id"], "2");
    assert_eq!(response["obj"]["value"], "ok");
    assert_eq!(
        broker.list_members("dead:echo:n1").await.unwrap(),
        vec!["not json"]
    );

    service.shutdown_handle().shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_payload_is_fatal_when_configured() {
    let broker = Arc::new(InMemoryBroker::new());
    let service = service(
        &broker,
        RelayConfig {
            on_decode_error: DecodeFailurePolicy::Fatal,
            ..config()
        },
    )
    .await;
    service.register("echo", echo(), None, None).await.unwrap();
    broker.push("echo:n1", b"{broken").await.unwrap();

    let result = tokio::time::timeout(WAIT, service.run_forever())
        .await
        .expect("loop should stop");
    assert!(matches!(result, Err(RelayError::Decode { key, .. }) if key == "echo:n1"));
}

#[tokio::test]
async fn registration_after_start_is_picked_up() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.push("hooks:late.out", b"client").await.unwrap();
    let service = service(&broker, config()).await;
    let running = spawn_loop(&service);

    tokio::time::sleep(Duration::from_millis(100)).await;
    service
        .register("late", tagged("late"), Some("late.out"), None)
        .await
        .unwrap();
    broker
        .push("late:n1", br#"{"id":"1","obj":{}}"#)
        .await
        .unwrap();

    let response = next_message(&broker, "late.out:client").await;
    assert_eq!(response["obj"]["tag"], "late");

    service.shutdown_handle().shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_worker() {
    let broker = Arc::new(InMemoryBroker::new());
    let service = service(&broker, config()).await;
    let slow: Arc<dyn DynHandler> = Arc::new(handler_fn(|_obj, _meta| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok::<_, HandlerError>(json!({ "finished": true }))
    }));
    service
        .register("slow", slow, None, Some("res:"))
        .await
        .unwrap();
    broker
        .push("slow:n1", br#"{"id":"1","obj":{}}"#)
        .await
        .unwrap();
    let running = spawn_loop(&service);

    for _ in 0..100 {
        if service.active_workers() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(service.active_workers(), 1);

    service.shutdown_handle().shutdown();
    running.await.unwrap().unwrap();

    assert!(broker.get("res:1").await.unwrap().is_some());
    assert_eq!(service.active_workers(), 0);
}

#[tokio::test]
async fn broadcast_fans_out_to_all_subscribers() {
    let broker = Arc::new(InMemoryBroker::new());
    for id in ["a", "b", "c"] {
        broker.push("hooks:news", id.as_bytes()).await.unwrap();
    }
    let service = service(&broker, config()).await;

    let delivered = service.broadcast("news", b"hello").await.unwrap();
    assert_eq!(delivered, 3);
    for id in ["a", "b", "c"] {
        assert_eq!(
            broker.list_members(&format!("news:{id}")).await.unwrap(),
            vec!["hello"]
        );
    }
}

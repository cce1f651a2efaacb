use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_core::impls::RedisBroker;
use relay_core::{Envelope, Handler, HandlerError, RelayConfig, Service};

/// `RELAY_LOG` でログレベルを指定（未指定なら info）
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("RELAY_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[derive(Debug, Deserialize)]
struct EchoInput {
    #[serde(default)]
    value: serde_json::Value,
    /// 指定があれば、その分だけ待ってから返す（同時実行数の確認用）
    #[serde(default)]
    delay_ms: Option<u64>,
}

struct EchoHandler;

#[async_trait]
impl Handler<EchoInput> for EchoHandler {
    type Output = serde_json::Value;

    async fn handle(
        &self,
        input: EchoInput,
        meta: &Envelope,
    ) -> Result<Self::Output, HandlerError> {
        if let Some(ms) = input.delay_ms {
            sleep(Duration::from_millis(ms)).await;
        }
        if input.value.as_str() == Some("boom") {
            return Err(HandlerError::new(format!("asked to fail (id={})", meta.id)));
        }
        Ok(serde_json::json!({ "value": input.value }))
    }
}

/// demo instance:
/// - `echo` キューに EchoHandler を登録（response は `echo.out`、結果は `echo:result:<id>` にも保存）
/// - Ctrl-C で graceful shutdown
#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        error!(error = %e, "relay stopped with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // (A) config: relay.yaml → 引数のファイル → RELAY__* 環境変数
    let path = std::env::args().nth(1);
    let config = RelayConfig::load(path.as_deref())?;

    // (B) broker に接続して Service を構築（起動時に stale hook を掃除）
    let broker = Arc::new(RedisBroker::connect(&config.redis_url).await?);
    let service = Arc::new(Service::builder(broker, config).build().await?);

    // (C) handler を登録
    service
        .register_typed::<EchoInput, _>("echo", EchoHandler, Some("echo.out"), Some("echo:result:"))
        .await?;
    info!(
        instance = %service.instance_id(),
        keys = ?service.registered_keys().await,
        "Registered handlers"
    );

    // (D) Ctrl-C で止める
    let shutdown = service.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, finishing in-flight work");
            shutdown.shutdown();
        }
    });

    // (E) dispatch loop
    service.run_forever().await?;
    Ok(())
}

//! Dispatch loop - 登録済みキーを監視して worker に渡す
//!
//! # フロー
//! 1. WAITING_FOR_SLOT: WorkerPool から slot を取る（空くまで待つ）
//! 2. WAITING_FOR_MESSAGE: 対応表から監視キーを読み直し、blocking pop（poll_timeout まで）
//! 3. decode → Registration を引く → worker を JoinSet に spawn（完了は待たない）
//!
//! slot は worker タスクへ move され、publish 後に解放される。
//! shutdown は pop と pop の間で観測する（pop 自体は中断しない）。

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, trace, warn};

use super::builder::Service;
use super::worker::{self, WorkerOutcome};
use crate::config::DecodeFailurePolicy;
use crate::domain::keys::dead_letter_key;
use crate::domain::{Envelope, EnvelopeCodec, RelayError};
use crate::typed::Registration;

type WorkerResult = (String, Result<WorkerOutcome, RelayError>);

/// worker の結果を記録する（supervisor 側の責務）
fn log_outcome(joined: Result<WorkerResult, JoinError>) {
    match joined {
        Ok((id, Ok(WorkerOutcome::Succeeded))) => debug!(id = %id, "Worker finished"),
        Ok((id, Ok(WorkerOutcome::Failed(record)))) => error!(
            id = %id,
            func = %record.func,
            exc_type = %record.exc_type,
            message = %record.internal_message,
            "Handler failed"
        ),
        Ok((id, Err(err))) => error!(id = %id, error = %err, "Failed to publish result"),
        Err(err) => error!(error = %err, "Worker task aborted"),
    }
}

impl Service {
    /// Run the dispatch loop.
    ///
    /// Returns `Ok(())` only after a shutdown request (see [`Service::shutdown_handle`]),
    /// once in-flight workers have finished. Broker errors and, under
    /// [`DecodeFailurePolicy::Fatal`], malformed payloads end the loop with `Err`.
    pub async fn run_forever(&self) -> Result<(), RelayError> {
        let mut shutdown = self.shutdown.subscribe();
        let mut workers: JoinSet<WorkerResult> = JoinSet::new();

        info!(instance = %self.instance_id, "Watching message broker");

        let result = loop {
            while let Some(joined) = workers.try_join_next() {
                log_outcome(joined);
            }
            if *shutdown.borrow() {
                break Ok(());
            }

            trace!(active = self.pool.active(), "Waiting for worker slot");
            let slot = tokio::select! {
                _ = shutdown.changed() => continue,
                slot = self.pool.acquire() => match slot {
                    Ok(slot) => slot,
                    Err(_) => break Ok(()),
                },
            };

            let keys = self.registry.read().await.keys();
            if keys.is_empty() {
                drop(slot);
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(self.poll_timeout) => {}
                }
                continue;
            }

            trace!(keys = keys.len(), "Waiting for message");
            let (key, payload) = match self.broker.blocking_pop(&keys, self.poll_timeout).await {
                Ok(Some(popped)) => popped,
                Ok(None) => continue,
                Err(err) => break Err(err.into()),
            };

            let (request, registration) = match self.admit(&key, &payload).await {
                Ok(Some(admitted)) => admitted,
                Ok(None) => continue,
                Err(err) => break Err(err),
            };

            debug!(
                id = %request.id,
                key = %key,
                func = %registration.queue,
                active = self.pool.active(),
                "Dispatching"
            );

            let slot = slot.occupy();
            let publisher = self.publisher.clone();
            workers.spawn(async move {
                let id = request.id.clone();
                let outcome = worker::execute(&publisher, &registration, request).await;
                drop(slot);
                (id, outcome)
            });
        };

        if !workers.is_empty() {
            info!(in_flight = workers.len(), "Waiting for in-flight workers");
        }
        while let Some(joined) = workers.join_next().await {
            log_outcome(joined);
        }
        info!(instance = %self.instance_id, "Dispatch loop stopped");
        result
    }

    /// Decode the payload and find its registration.
    ///
    /// `Ok(None)` means the payload was set aside according to the decode policy.
    async fn admit(
        &self,
        key: &str,
        payload: &[u8],
    ) -> Result<Option<(Envelope, Registration)>, RelayError> {
        let request = match EnvelopeCodec::decode_request(payload) {
            Ok(request) => request,
            Err(source) => {
                let err = RelayError::Decode {
                    key: key.to_string(),
                    source,
                };
                return self.reject(key, payload, err).await.map(|()| None);
            }
        };

        let registration = self.registry.read().await.get(key).cloned();
        match registration {
            Some(registration) => Ok(Some((request, registration))),
            None => {
                let err = RelayError::UnknownKey(key.to_string());
                self.reject(key, payload, err).await.map(|()| None)
            }
        }
    }

    async fn reject(&self, key: &str, payload: &[u8], err: RelayError) -> Result<(), RelayError> {
        match self.decode_policy {
            DecodeFailurePolicy::Fatal => Err(err),
            DecodeFailurePolicy::DeadLetter => {
                let dead = dead_letter_key(key);
                self.broker.push(&dead, payload).await?;
                warn!(key = %key, dead_letter = %dead, error = %err, "Dead-lettered payload");
                Ok(())
            }
        }
    }
}

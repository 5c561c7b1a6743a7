//! Cooperative event loop driving a mental plane.
//!
//! One task owns the plane and consumes a bounded message channel:
//! events are ingested inline, intents are dispatched (inline or as
//! spawned tasks, per config) and a periodic maintenance tick runs
//! consolidation and pruning. `Stop` drains already-queued messages and
//! exits without waiting for in-flight intent tasks.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use noesis_core::{Outcome, Record};

use crate::config::RuntimeConfig;
use crate::plane::MentalPlane;

/// Errors surfaced by a [`PlaneHandle`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The event loop has stopped; no further messages are accepted.
    #[error("plane event loop is not running")]
    ChannelClosed,
}

/// Messages consumed by the plane event loop.
pub enum PlaneMessage {
    /// Ingest a record into the plane's stores
    Event(Record),
    /// Dispatch a transformation and reply with its outcome
    Intent(Record, oneshot::Sender<Outcome>),
    /// Drain queued messages and exit
    Stop,
}

/// Cloneable sender half for a running plane loop.
#[derive(Clone)]
pub struct PlaneHandle {
    sender: mpsc::Sender<PlaneMessage>,
}

impl PlaneHandle {
    /// Queue an event record for ingestion.
    pub async fn send_event(&self, record: Record) -> Result<(), RuntimeError> {
        self.sender
            .send(PlaneMessage::Event(record))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Submit a transformation and await its terminal outcome.
    pub async fn submit_intent(&self, transformation: Record) -> Result<Outcome, RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(PlaneMessage::Intent(transformation, reply))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        response.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Ask the loop to drain and exit.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        self.sender
            .send(PlaneMessage::Stop)
            .await
            .map_err(|_| RuntimeError::ChannelClosed)
    }
}

/// Event loop owning a [`MentalPlane`].
pub struct PlaneRuntime {
    plane: Arc<MentalPlane>,
    receiver: mpsc::Receiver<PlaneMessage>,
    config: RuntimeConfig,
}

impl PlaneRuntime {
    /// Pair a runtime with the handle that feeds it.
    pub fn new(plane: Arc<MentalPlane>, config: RuntimeConfig) -> (Self, PlaneHandle) {
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        (
            Self {
                plane,
                receiver,
                config,
            },
            PlaneHandle { sender },
        )
    }

    /// Run the loop until `Stop` or until every handle is dropped.
    pub async fn run(mut self) {
        let cycle = Duration::from_secs(self.config.cycle_interval_secs.max(1));
        let mut maintenance = interval_at(Instant::now() + cycle, cycle);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(plane = %self.plane.id(), "plane event loop started");

        loop {
            tokio::select! {
                message = self.receiver.recv() => match message {
                    Some(PlaneMessage::Stop) | None => {
                        self.drain().await;
                        break;
                    }
                    Some(PlaneMessage::Event(record)) => self.ingest(record),
                    Some(PlaneMessage::Intent(transformation, reply)) => {
                        self.dispatch(transformation, reply).await;
                    }
                },
                _ = maintenance.tick() => self.maintain(),
            }
        }
        info!(plane = %self.plane.id(), "plane event loop stopped");
    }

    /// Process messages already queued at shutdown.
    async fn drain(&mut self) {
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                PlaneMessage::Event(record) => self.ingest(record),
                PlaneMessage::Intent(transformation, reply) => {
                    self.dispatch(transformation, reply).await;
                }
                PlaneMessage::Stop => {}
            }
        }
    }

    fn ingest(&self, record: Record) {
        if let Err(e) = self.plane.on_event(record) {
            warn!(plane = %self.plane.id(), error = %e, "event rejected");
        }
    }

    async fn dispatch(&self, transformation: Record, reply: oneshot::Sender<Outcome>) {
        if self.config.concurrent_intents {
            let plane = Arc::clone(&self.plane);
            tokio::spawn(async move {
                let outcome = plane.submit_intent(transformation).await;
                let _ = reply.send(outcome);
            });
        } else {
            let outcome = self.plane.submit_intent(transformation).await;
            let _ = reply.send(outcome);
        }
    }

    fn maintain(&self) {
        match self.plane.consolidate_memories() {
            Ok(abstractions) if !abstractions.is_empty() => {
                debug!(plane = %self.plane.id(), count = abstractions.len(), "maintenance consolidated groups");
            }
            Ok(_) => {}
            Err(e) => warn!(plane = %self.plane.id(), error = %e, "consolidation failed"),
        }
        match self.plane.prune_memories() {
            Ok(pruned) if !pruned.is_empty() => {
                debug!(plane = %self.plane.id(), count = pruned.len(), "maintenance pruned records");
            }
            Ok(_) => {}
            Err(e) => warn!(plane = %self.plane.id(), error = %e, "pruning failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaneConfig;
    use crate::surface::DispatchSurface;
    use futures::future::join_all;
    use noesis_agent::{MockBackend, TransformationDispatcher};
    use noesis_core::{Kind, OutcomeStatus};
    use serde_json::json;

    async fn echo_plane(config: PlaneConfig) -> Arc<MentalPlane> {
        let dispatcher = Arc::new(TransformationDispatcher::with_backend(Arc::new(
            MockBackend::default(),
        )));
        dispatcher
            .register_fn("echo", |t: Record| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Outcome::success(t.id, json!({"echo": true}))
                })
            })
            .await;
        Arc::new(MentalPlane::new(
            Arc::new(DispatchSurface::new(dispatcher)),
            config,
        ))
    }

    #[tokio::test]
    async fn test_events_flow_through_loop() {
        let plane = echo_plane(PlaneConfig::new("loop-plane")).await;
        let (runtime, handle) = PlaneRuntime::new(Arc::clone(&plane), RuntimeConfig::default());
        let worker = tokio::spawn(runtime.run());

        let record = Record::new(Kind::Memory);
        handle.send_event(record.clone()).await.unwrap();
        handle.stop().await.unwrap();
        worker.await.unwrap();

        assert!(plane.memory().get(record.id).is_ok());
        assert!(plane.selfmap().contains_node(record.id));
    }

    #[tokio::test]
    async fn test_stop_drains_queued_messages() {
        let plane = echo_plane(PlaneConfig::new("loop-plane")).await;
        let (runtime, handle) = PlaneRuntime::new(Arc::clone(&plane), RuntimeConfig::default());

        // Queue everything before the loop starts consuming
        let records: Vec<Record> = (0..5).map(|_| Record::new(Kind::Memory)).collect();
        for record in &records {
            handle.send_event(record.clone()).await.unwrap();
        }
        handle.stop().await.unwrap();

        tokio::spawn(runtime.run()).await.unwrap();
        for record in &records {
            assert!(plane.memory().get(record.id).is_ok());
        }
    }

    #[tokio::test]
    async fn test_intent_roundtrip_through_loop() {
        let plane = echo_plane(PlaneConfig::new("loop-plane")).await;
        let (runtime, handle) = PlaneRuntime::new(plane, RuntimeConfig::default());
        let worker = tokio::spawn(runtime.run());

        let outcome = handle
            .submit_intent(Record::transformation("echo"))
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);

        handle.stop().await.unwrap();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_intents_all_complete() {
        let plane = echo_plane(PlaneConfig::new("loop-plane")).await;
        let config = RuntimeConfig {
            concurrent_intents: true,
            ..Default::default()
        };
        let (runtime, handle) = PlaneRuntime::new(plane, config);
        let worker = tokio::spawn(runtime.run());

        let submissions = (0..8).map(|_| {
            let handle = handle.clone();
            async move { handle.submit_intent(Record::transformation("echo")).await }
        });
        for outcome in join_all(submissions).await {
            assert_eq!(outcome.unwrap().status, OutcomeStatus::Success);
        }

        handle.stop().await.unwrap();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_fails_after_shutdown() {
        let plane = echo_plane(PlaneConfig::new("loop-plane")).await;
        let (runtime, handle) = PlaneRuntime::new(plane, RuntimeConfig::default());
        let worker = tokio::spawn(runtime.run());

        handle.stop().await.unwrap();
        worker.await.unwrap();

        assert!(matches!(
            handle.send_event(Record::new(Kind::Memory)).await,
            Err(RuntimeError::ChannelClosed)
        ));
    }
}

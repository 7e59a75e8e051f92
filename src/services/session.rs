// Generation session
//
// Starts generation runs against a `Generator` and feeds their results to the
// multiplexer. Starting a run supersedes the previous one: its task is aborted
// and anything it already queued is dropped by the run id check.

use super::generator::{Generator, GeneratorError, ItemRequest, SetRequest};
use super::multiplexer::{Inbound, MultiplexerHandle};
use super::stream_decoder::{DecodeError, FrameDecoder};
use crate::models::{Channel, Item, Progress, RunId, RunMode, SetVariant, SlotAssignment};
use crate::state::StateManager;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

pub struct Session<G> {
    generator: Arc<G>,
    state: StateManager,
    sink: MultiplexerHandle,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl<G> Session<G>
where
    G: Generator + Send + Sync + 'static,
{
    pub fn new(generator: Arc<G>, state: StateManager, sink: MultiplexerHandle) -> Self {
        Self {
            generator,
            state,
            sink,
            current: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Fetch the skeleton for `variant` and reset the collection to it.
    /// Returns the number of slots.
    pub async fn load_skeleton(&self, variant: SetVariant) -> Result<usize, GeneratorError> {
        let skeleton = self.generator.fetch_skeleton(variant).await?;
        let total = skeleton.total_slots();
        self.supersede(None);
        self.state.reset(skeleton, variant);
        Ok(total)
    }

    fn supersede(&self, next: Option<JoinHandle<()>>) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.take() {
            if !previous.is_finished() {
                tracing::info!("Superseding in-flight generation run");
            }
            previous.abort();
        }
        *current = next;
    }

    fn request(&self, theme: &str) -> SetRequest {
        SetRequest::new(theme, self.state.read(|s| s.variant))
    }

    /// Start a streaming run. Frames are applied in arrival order.
    pub fn start_stream(&self, theme: &str) -> RunId {
        let request = self.request(theme);
        let run = self.state.begin_run(theme, RunMode::Streaming);
        let task = tokio::spawn(pump_stream(
            self.generator.clone(),
            request,
            run,
            self.sink.clone(),
        ));
        self.supersede(Some(task));
        run
    }

    /// Start a batched bulk run. With the push channel connected, items and
    /// batch telemetry also arrive as push notifications while it runs.
    pub fn start_batched(&self, theme: &str) -> RunId {
        let request = self.request(theme);
        let run = self.state.begin_run(theme, RunMode::Batched);
        let generator = self.generator.clone();
        let sink = self.sink.clone();

        let task = tokio::spawn(async move {
            let inbound = match generator.generate_batched(request).await {
                Ok(response) => Inbound::Bulk { run, response },
                Err(e) => Inbound::Failed {
                    channel: Channel::Bulk,
                    run: Some(run),
                    error: e.to_string(),
                },
            };
            if sink.send(inbound).await.is_err() {
                tracing::warn!(%run, "Bulk response arrived after shutdown");
            }
        });
        self.supersede(Some(task));
        run
    }

    /// Generate the item for one slot and apply it.
    ///
    /// Failures are returned to the caller, who decides whether to retry.
    pub async fn generate_slot(&self, theme: &str, slot_id: &str) -> Result<Item, GeneratorError> {
        let request = self
            .state
            .read(|s| {
                let (category, sub_category) = s.skeleton.locate(slot_id)?;
                let descriptor = s.skeleton.descriptor(slot_id)?;
                Some(ItemRequest {
                    theme: theme.to_string(),
                    category: category.to_string(),
                    sub_category: sub_category.to_string(),
                    slot_id: slot_id.to_string(),
                    slot_data: descriptor.to_provider_json(),
                })
            })
            .ok_or_else(|| GeneratorError::UnknownSlot(slot_id.to_string()))?;

        let assignment_path = (request.category.clone(), request.sub_category.clone());
        let item = self.generator.generate_item(request).await?;

        let assignment = SlotAssignment::new(
            assignment_path.0,
            assignment_path.1,
            slot_id,
            item.clone(),
        );
        if self.sink.send(Inbound::Direct(assignment)).await.is_err() {
            tracing::warn!(slot_id, "Single item generated after shutdown");
        }
        Ok(item)
    }

    /// Wait until `run` is no longer the active run, then report progress.
    pub async fn wait_for_run(&self, run: RunId) -> Progress {
        let mut changes = self.state.subscribe();
        loop {
            let done = self.state.read(|s| s.run.id != run || !s.run.active);
            if done {
                return self.state.progress();
            }
            match changes.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return self.state.progress(),
            }
        }
    }
}

impl<G> Drop for Session<G> {
    fn drop(&mut self) {
        let current = self.current.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = current.take() {
            task.abort();
        }
    }
}

async fn send_frame(
    sink: &MultiplexerHandle,
    run: RunId,
    decoded: Result<super::normalizer::StreamFrame, DecodeError>,
) -> bool {
    let inbound = match decoded {
        Ok(frame) => Inbound::Frame { run, frame },
        Err(e) => Inbound::Malformed {
            channel: Channel::Stream,
            error: e.to_string(),
        },
    };
    sink.send(inbound).await.is_ok()
}

/// Read the streaming response for `run` and forward every frame.
async fn pump_stream<G>(generator: Arc<G>, request: SetRequest, run: RunId, sink: MultiplexerHandle)
where
    G: Generator + Send + Sync + 'static,
{
    let mut stream = match generator.stream_set(request).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = sink
                .send(Inbound::StreamEnded {
                    run,
                    error: Some(e.to_string()),
                })
                .await;
            return;
        }
    };

    let mut decoder = FrameDecoder::new();
    let mut failure = None;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                for decoded in decoder.push(&bytes) {
                    if !send_frame(&sink, run, decoded).await {
                        return;
                    }
                }
            }
            Err(e) => {
                failure = Some(e.to_string());
                break;
            }
        }
    }

    if failure.is_none() {
        if let Some(decoded) = decoder.finish() {
            if !send_frame(&sink, run, decoded).await {
                return;
            }
        }
    }

    tracing::debug!(%run, failed = failure.is_some(), "Generation stream ended");
    let _ = sink.send(Inbound::StreamEnded { run, error: failure }).await;
}

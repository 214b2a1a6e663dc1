//! Runs property computations over photos, synchronously or on a
//! background worker thread.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::measure::computation::ComputationRegistry;
use crate::measure::regions::RegionsCache;
use crate::model::hierarchy::Label;
use crate::model::photo::Photo;
use crate::model::property::RegionProperty;
use crate::storage::LabelStore;

/// One unit of scheduled work: a computation key and the labels to measure.
#[derive(Debug, Clone)]
pub struct Job {
    pub computation_key: String,
    pub labels: Vec<Label>,
}

impl Job {
    pub fn new(computation_key: impl Into<String>, labels: Vec<Label>) -> Self {
        Self {
            computation_key: computation_key.into(),
            labels,
        }
    }
}

/// Drives a set of jobs over single photos, sharing one regions cache per
/// photo across all computations in the run.
pub struct ComputationsScheduler {
    registry: ComputationRegistry,
    /// Layer the measurements are taken from and attached to.
    layer: String,
}

impl ComputationsScheduler {
    pub fn new(registry: ComputationRegistry, layer: impl Into<String>) -> Self {
        Self {
            registry,
            layer: layer.into(),
        }
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Run every job against one photo. Jobs naming an unregistered
    /// computation are skipped with a warning.
    pub fn run(&self, photo: &Photo, jobs: &[Job]) -> Vec<RegionProperty> {
        let all_labels: BTreeSet<Label> = jobs
            .iter()
            .flat_map(|job| job.labels.iter().copied())
            .collect();
        let mut cache = RegionsCache::new(&all_labels, photo, &self.layer);
        let mut props = Vec::new();
        for job in jobs {
            let Some(computation) = self.registry.get(&job.computation_key) else {
                log::warn!("No computation registered under '{}'", job.computation_key);
                continue;
            };
            log::debug!(
                "Running '{}' on photo '{}' ({} labels)",
                job.computation_key,
                photo.name(),
                job.labels.len()
            );
            props.extend(computation.compute(photo, &job.labels, &mut cache));
        }
        props
    }

    /// Run every job and attach the resulting records to the photo's layer.
    /// Returns the number of records attached.
    pub fn run_and_attach(&self, photo: &mut Photo, jobs: &[Job]) -> usize {
        let props = self.run(photo, jobs);
        let count = props.len();
        if let Some(layer) = photo.layer_mut(&self.layer) {
            for prop in props {
                layer.set_region_prop(prop.label, prop);
            }
        } else {
            log::warn!(
                "Photo '{}' has no layer '{}', dropping {} records",
                photo.name(),
                self.layer,
                count
            );
            return 0;
        }
        count
    }
}

/// Cooperative cancellation flag shared with a running batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress report from a running batch.
#[derive(Debug)]
pub enum BatchMessage {
    /// One photo measured and persisted.
    Progress {
        completed: usize,
        total: usize,
        photo: String,
    },
    /// One photo failed; the batch continues with the next one.
    PhotoFailed { photo: String, error: String },
    /// Every photo was processed.
    Finished,
    /// The batch stopped early at a cancellation point.
    Cancelled,
}

/// Owns a worker thread measuring a list of photos against a store.
///
/// The worker loads each photo, runs the scheduler, attaches the records
/// and persists the layer before reporting progress. Cancellation is
/// checked between photos; a photo already in flight finishes.
pub struct BatchRunner {
    result_rx: Receiver<BatchMessage>,
    cancel: CancelToken,
    thread_handle: Option<JoinHandle<()>>,
}

impl BatchRunner {
    /// Spawn a batch over `photos`, reporting through the returned runner.
    pub fn spawn(
        store: Arc<dyn LabelStore + Send + Sync>,
        scheduler: ComputationsScheduler,
        photos: Vec<String>,
        jobs: Vec<Job>,
    ) -> Result<Self, String> {
        Self::spawn_with_token(store, scheduler, photos, jobs, CancelToken::new())
    }

    /// Like [`Self::spawn`], with a caller-owned cancellation token.
    pub fn spawn_with_token(
        store: Arc<dyn LabelStore + Send + Sync>,
        scheduler: ComputationsScheduler,
        photos: Vec<String>,
        jobs: Vec<Job>,
        cancel: CancelToken,
    ) -> Result<Self, String> {
        let (result_tx, result_rx) = mpsc::channel();
        let thread_cancel = cancel.clone();
        let thread_handle = thread::Builder::new()
            .name("measurement-batch".to_string())
            .spawn(move || {
                log::info!("Measurement batch started ({} photos)", photos.len());
                Self::thread_loop(store, scheduler, photos, jobs, thread_cancel, result_tx);
                log::info!("Measurement batch thread exiting");
            })
            .map_err(|e| format!("Failed to spawn batch thread: {e}"))?;
        Ok(Self {
            result_rx,
            cancel,
            thread_handle: Some(thread_handle),
        })
    }

    fn thread_loop(
        store: Arc<dyn LabelStore + Send + Sync>,
        scheduler: ComputationsScheduler,
        photos: Vec<String>,
        jobs: Vec<Job>,
        cancel: CancelToken,
        result_tx: Sender<BatchMessage>,
    ) {
        let total = photos.len();
        let mut completed = 0usize;
        for name in photos {
            if cancel.is_cancelled() {
                log::info!("Measurement batch cancelled after {completed}/{total} photos");
                let _ = result_tx.send(BatchMessage::Cancelled);
                return;
            }
            match Self::process_photo(&*store, &scheduler, &name, &jobs) {
                Ok(count) => {
                    completed += 1;
                    log::debug!("Measured photo '{name}': {count} records");
                    if result_tx
                        .send(BatchMessage::Progress {
                            completed,
                            total,
                            photo: name,
                        })
                        .is_err()
                    {
                        log::warn!("Batch channel closed, stopping");
                        return;
                    }
                }
                Err(error) => {
                    log::warn!("Photo '{name}' failed: {error}");
                    if result_tx
                        .send(BatchMessage::PhotoFailed { photo: name, error })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
        let _ = result_tx.send(BatchMessage::Finished);
    }

    fn process_photo(
        store: &(dyn LabelStore + Send + Sync),
        scheduler: &ComputationsScheduler,
        name: &str,
        jobs: &[Job],
    ) -> Result<usize, String> {
        let mut photo = store.load_photo(name).map_err(|e| e.to_string())?;
        let count = scheduler.run_and_attach(&mut photo, jobs);
        if let Some(layer) = photo.layer_mut(scheduler.layer()) {
            store.save_layer(name, layer).map_err(|e| e.to_string())?;
        }
        Ok(count)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Non-blocking poll for the next message.
    pub fn try_recv(&self) -> Option<BatchMessage> {
        match self.result_rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking wait for the next message; `None` once the worker is gone.
    pub fn recv(&self) -> Option<BatchMessage> {
        self.result_rx.recv().ok()
    }
}

impl Drop for BatchRunner {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("Measurement batch thread panicked");
            }
        }
    }
}

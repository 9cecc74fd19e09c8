//! Background training task.
//!
//! Inputs are moved into a dedicated thread; progress snapshots and the
//! final map come back over a one-way channel. Nothing is shared.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::JoinHandle;
use tracing::{debug, error, info};

use crate::config::SomConfig;
use crate::error::{Result, SomError};
use crate::som::{GridShape, SomMap, SomTrainer, TrainingProgress, TrainingReport};

/// Message sent from the training thread.
#[derive(Debug)]
pub enum TrainingEvent {
    Progress(TrainingProgress),
    Finished(Result<TrainedMap>),
}

/// Final product of a training run.
#[derive(Debug, Clone)]
pub struct TrainedMap {
    pub map: SomMap,
    pub report: TrainingReport,
}

/// Receiving end of a running training task.
pub struct TrainingHandle {
    events: Receiver<TrainingEvent>,
    thread: Option<JoinHandle<()>>,
    finished: bool,
}

/// Spawns a training run for `samples` on its own thread.
pub fn spawn_training(
    samples: Vec<Vec<f64>>,
    shape: GridShape,
    dim: usize,
    config: SomConfig,
) -> std::io::Result<TrainingHandle> {
    let (tx, rx) = mpsc::channel();
    let iterations = config.iterations_for(samples.len());
    let sample_count = samples.len();

    let thread = std::thread::Builder::new()
        .name("som-trainer".to_string())
        .spawn(move || {
            let mut trainer = SomTrainer::new(iterations, &config);
            let mut map = trainer.initial_map(shape, dim);

            let progress_tx = tx.clone();
            let result = trainer.train(&mut map, &samples, |p| {
                // Receiver may be gone if the viewer closed
                progress_tx.send(TrainingEvent::Progress(p)).ok();
            });

            let outcome = result.map(|report| TrainedMap { map, report });
            if let Err(e) = &outcome {
                error!("Training failed: {}", e);
            }
            tx.send(TrainingEvent::Finished(outcome)).ok();
        })?;

    info!(
        "Training task started: {} samples of dim {}, {} iterations",
        sample_count, dim, iterations
    );
    Ok(TrainingHandle {
        events: rx,
        thread: Some(thread),
        finished: false,
    })
}

impl TrainingHandle {
    /// Drains pending events without blocking.
    pub fn poll(&mut self) -> Vec<TrainingEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if matches!(event, TrainingEvent::Finished(_)) {
                        self.finished = true;
                        self.join();
                    }
                    events.push(event);
                    if self.finished {
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.finished = true;
                    self.join();
                    events.push(TrainingEvent::Finished(Err(SomError::TaskAborted)));
                    break;
                }
            }
        }
        events
    }

    /// Blocks until the run finishes, forwarding progress to `on_progress`.
    pub fn wait<F>(mut self, mut on_progress: F) -> Result<TrainedMap>
    where
        F: FnMut(TrainingProgress),
    {
        let outcome = loop {
            match self.events.recv() {
                Ok(TrainingEvent::Progress(p)) => on_progress(p),
                Ok(TrainingEvent::Finished(result)) => break result,
                Err(_) => break Err(SomError::TaskAborted),
            }
        };
        self.finished = true;
        self.join();
        outcome
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Training thread panicked");
            } else {
                debug!("Training thread joined");
            }
        }
    }
}

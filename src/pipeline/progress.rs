/*!
 * Progress events.
 *
 * Every event is first appended to the job's event log in the database and
 * then broadcast to live subscribers. Subscribers replay the log before
 * following the broadcast, and fall back to the log whenever they miss
 * broadcast messages, so polling and streaming always agree.
 */

use anyhow::Result;
use futures::stream::{self, Stream};
use log::warn;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::stage::Stage;
use crate::database::models::JobEventRecord;
use crate::database::Repository;

/// Broadcast buffer per job; slower subscribers re-read the log
const CHANNEL_CAPACITY: usize = 256;

/// Persists progress events and fans them out to subscribers
#[derive(Clone)]
pub struct ProgressHub {
    repo: Repository,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<JobEventRecord>>>>,
}

impl ProgressHub {
    /// Create a hub over the job event log
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record in-stage progress and broadcast the stored event
    pub async fn emit(&self, job_id: &str, percentage: f64, detail: Option<String>) -> Result<JobEventRecord> {
        let event = self.repo.append_progress(job_id, percentage, detail).await?;
        self.publish(&event);
        Ok(event)
    }

    /// Broadcast an event that is already persisted
    pub fn publish(&self, event: &JobEventRecord) {
        let mut channels = self.channels.lock();
        if let Some(sender) = channels.get(&event.job_id) {
            // No receivers is fine: the log has the event
            let _ = sender.send(event.clone());
        }
        let unused = channels
            .get(&event.job_id)
            .is_some_and(|sender| sender.receiver_count() == 0);
        if unused || event.stage.is_terminal() {
            channels.remove(&event.job_id);
        }
    }

    /// Full event history of a job
    pub async fn replay(&self, job_id: &str) -> Result<Vec<JobEventRecord>> {
        self.repo.get_events(job_id, 0).await
    }

    fn receiver(&self, job_id: &str) -> broadcast::Receiver<JobEventRecord> {
        self.channels
            .lock()
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Progress events of a job, from the first one, until it reaches a
    /// terminal stage. Unknown jobs yield an empty stream.
    pub fn subscribe(&self, job_id: &str) -> impl Stream<Item = JobEventRecord> + Send + 'static {
        // Subscribe before reading the log so nothing falls in between
        let subscription = Subscription {
            hub: self.clone(),
            job_id: job_id.to_string(),
            receiver: self.receiver(job_id),
            backlog: VecDeque::new(),
            last_seq: 0,
            needs_reload: true,
            finished: false,
        };

        stream::unfold(subscription, |mut subscription| async move {
            let event = subscription.next_event().await?;
            Some((event, subscription))
        })
    }
}

struct Subscription {
    hub: ProgressHub,
    job_id: String,
    receiver: broadcast::Receiver<JobEventRecord>,
    backlog: VecDeque<JobEventRecord>,
    last_seq: i64,
    needs_reload: bool,
    finished: bool,
}

impl Subscription {
    async fn reload(&mut self) -> Option<()> {
        self.needs_reload = false;
        match self.hub.repo.get_events(&self.job_id, self.last_seq).await {
            Ok(events) => {
                self.backlog.extend(events);
                Some(())
            }
            Err(e) => {
                warn!("Progress log for job {} unavailable: {:#}", self.job_id, e);
                None
            }
        }
    }

    async fn next_event(&mut self) -> Option<JobEventRecord> {
        loop {
            if self.finished {
                return None;
            }

            if self.needs_reload {
                self.reload().await?;
                if self.last_seq == 0 && self.backlog.is_empty() {
                    // Nothing logged means the job does not exist
                    self.finished = true;
                    continue;
                }
            }

            if let Some(event) = self.backlog.pop_front() {
                if event.seq <= self.last_seq {
                    continue;
                }
                self.last_seq = event.seq;
                if event.stage.is_terminal() {
                    self.finished = true;
                    self.hub.channels.lock().remove(&self.job_id);
                }
                return Some(event);
            }

            match self.receiver.recv().await {
                Ok(event) => self.backlog.push_back(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber of job {} lagged by {} events, re-reading log", self.job_id, skipped);
                    self.needs_reload = true;
                }
                Err(RecvError::Closed) => {
                    self.reload().await?;
                    if self.backlog.is_empty() {
                        return None;
                    }
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Let go of our receiver first so the count below excludes it
        drop(std::mem::replace(&mut self.receiver, broadcast::channel(1).1));

        let mut channels = self.hub.channels.lock();
        if channels
            .get(&self.job_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(&self.job_id);
        }
    }
}

/// Progress reporter for one running stage.
///
/// Maps fractions of the stage's work onto its band and never reports a
/// lower percentage than before.
pub struct StageProgress {
    hub: ProgressHub,
    job_id: String,
    stage: Stage,
    last: Mutex<f64>,
}

impl StageProgress {
    /// Reporter starting at the beginning of the stage band
    pub fn new(hub: ProgressHub, job_id: &str, stage: Stage) -> Self {
        Self {
            hub,
            job_id: job_id.to_string(),
            stage,
            last: Mutex::new(stage.band().0),
        }
    }

    /// Stage being reported
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Report that `fraction` of the stage is complete
    pub async fn update(&self, fraction: f64, detail: Option<String>) -> Result<()> {
        let percentage = self.stage.percentage_at(fraction);
        {
            let mut last = self.last.lock();
            if percentage <= *last && detail.is_none() {
                return Ok(());
            }
            *last = last.max(percentage);
        }
        let reported = *self.last.lock();
        self.hub.emit(&self.job_id, reported, detail).await?;
        Ok(())
    }

    /// Report a message without moving the percentage
    pub async fn detail(&self, message: impl Into<String>) -> Result<()> {
        let reported = *self.last.lock();
        self.hub.emit(&self.job_id, reported, Some(message.into())).await?;
        Ok(())
    }
}

//! Three-stage paginated fetch engine.
//!
//! Producers list ids page by page, parsers fetch full records for batches
//! of ids, and a single consumer (the calling thread) hands records to the
//! writer with strictly increasing sequence numbers. Stage completion is
//! signalled by dropping channel senders. The first fault cancels every
//! stage and becomes the run's result.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::SraGraphError;
use crate::progress::{ProgressEvent, ProgressSink, Stage};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Ids per listing page.
    pub retmax: usize,
    /// Ids per record fetch.
    pub batch: usize,
    pub parsers: usize,
    pub producers: usize,
    /// Sequence number given to the first consumed record.
    pub start_seq: i64,
    /// Minimum wall-clock time per external call of one worker.
    pub min_fetch_interval: Duration,
    /// Ceiling on external calls per second across all workers of a run.
    pub requests_per_second: usize,
    pub queue_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retmax: 150,
            batch: 100,
            parsers: 2,
            producers: 2,
            start_seq: 0,
            min_fetch_interval: Duration::from_secs(1),
            requests_per_second: 3,
            queue_capacity: 1024,
        }
    }
}

/// What the consumer did with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumed {
    /// Written under the offered sequence number.
    Written,
    /// Rejected; the sequence number stays available.
    Skipped,
}

/// The pluggable work of each stage.
pub trait Stages: Sync {
    type Record: Send;

    fn count(&self) -> Result<u64, SraGraphError>;

    fn list_ids(&self, retstart: u64, retmax: usize) -> Result<Vec<String>, SraGraphError>;

    fn fetch(&self, ids: &[String]) -> Result<Vec<Self::Record>, SraGraphError>;

    fn consume(&self, record: Self::Record, seq: i64) -> Result<Consumed, SraGraphError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub total: u64,
    pub consumed: u64,
    pub skipped: u64,
    pub first_seq: i64,
    pub next_seq: i64,
}

/// Cooperative cancellation shared between the caller and the workers.
///
/// Cancelling drops an internal sender so the token's receiver becomes
/// ready, which lets workers `select!` on it next to their channels.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, signal) = bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let mut trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        trigger.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Disconnects once the token is cancelled. Never yields a message.
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Caller cancellation plus the run's own fault abort.
struct Stop {
    user: CancelToken,
    fault: CancelToken,
}

impl Stop {
    fn is_set(&self) -> bool {
        self.user.is_cancelled() || self.fault.is_cancelled()
    }

    fn recv<T>(&self, rx: &Receiver<T>) -> Option<T> {
        if self.is_set() {
            return None;
        }
        select! {
            recv(rx) -> msg => msg.ok(),
            recv(self.user.signal()) -> _ => None,
            recv(self.fault.signal()) -> _ => None,
        }
    }

    fn send<T>(&self, tx: &Sender<T>, item: T) -> bool {
        if self.is_set() {
            return false;
        }
        select! {
            send(tx, item) -> res => res.is_ok(),
            recv(self.user.signal()) -> _ => false,
            recv(self.fault.signal()) -> _ => false,
        }
    }

    fn sleep(&self, duration: Duration) {
        select! {
            recv(self.user.signal()) -> _ => {},
            recv(self.fault.signal()) -> _ => {},
            default(duration) => {},
        }
    }
}

/// Run-wide spacing of external calls. The lock is held while waiting so
/// consecutive calls start at least `spacing` apart.
struct Pacer {
    spacing: Duration,
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    fn new(requests_per_second: usize) -> Self {
        let per_second = requests_per_second.max(1) as u64;
        Self {
            spacing: Duration::from_millis(1000u64.div_ceil(per_second)),
            last: Mutex::new(None),
        }
    }

    /// Waits for the next free slot. False when the run stopped meanwhile.
    fn wait_turn(&self, stop: &Stop) -> bool {
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = *last {
            let wait = (previous + self.spacing).saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                stop.sleep(wait);
            }
        }
        if stop.is_set() {
            return false;
        }
        *last = Some(Instant::now());
        true
    }
}

struct Shared<'a> {
    stop: Stop,
    pacer: Pacer,
    failure: Mutex<Option<SraGraphError>>,
    sink: &'a dyn ProgressSink,
    settings: &'a PipelineSettings,
    pages: u64,
    pages_done: AtomicU64,
    parsers: u64,
    parsers_done: AtomicU64,
}

impl Shared<'_> {
    fn fail(&self, role: &str, err: SraGraphError) {
        error!(role, "pipeline fault: {err}");
        let mut slot = self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(err);
        }
        drop(slot);
        self.stop.fault.cancel();
    }

    /// Runs one external call in the next run-wide slot, then holds the
    /// worker until its own minimum interval has passed.
    fn paced<T>(
        &self,
        call: impl FnOnce() -> Result<T, SraGraphError>,
    ) -> Result<T, SraGraphError> {
        if !self.pacer.wait_turn(&self.stop) {
            return Err(SraGraphError::Aborted);
        }
        let started = Instant::now();
        let result = call();
        if result.is_ok() {
            if let Some(remaining) = self
                .settings
                .min_fetch_interval
                .checked_sub(started.elapsed())
            {
                self.stop.sleep(remaining);
            }
        }
        result
    }
}

/// Drives `stages` to completion, cancellation or the first fault.
pub fn run_pipeline<S: Stages>(
    stages: &S,
    settings: &PipelineSettings,
    cancel: &CancelToken,
    sink: &dyn ProgressSink,
) -> Result<PipelineReport, SraGraphError> {
    let stop = Stop {
        user: cancel.clone(),
        fault: CancelToken::new(),
    };
    let pacer = Pacer::new(settings.requests_per_second);
    if !pacer.wait_turn(&stop) {
        return Err(SraGraphError::Aborted);
    }
    let total = stages.count()?;
    info!(total, "result count");
    if total == 0 {
        return Ok(PipelineReport {
            total,
            consumed: 0,
            skipped: 0,
            first_seq: settings.start_seq,
            next_seq: settings.start_seq,
        });
    }

    let retmax = settings.retmax.max(1);
    let pages = total.div_ceil(retmax as u64);
    let producers = settings.producers.clamp(1, pages as usize);
    let parsers = settings.parsers.max(1);
    let capacity = settings.queue_capacity.max(1);

    let (page_tx, page_rx) = unbounded::<u64>();
    for page in 0..pages {
        let _ = page_tx.send(page * retmax as u64);
    }
    drop(page_tx);

    let (id_tx, id_rx) = bounded::<String>(capacity);
    let (record_tx, record_rx) = bounded::<S::Record>(capacity);

    let shared = Shared {
        stop,
        pacer,
        failure: Mutex::new(None),
        sink,
        settings,
        pages,
        pages_done: AtomicU64::new(0),
        parsers: parsers as u64,
        parsers_done: AtomicU64::new(0),
    };

    let (consumed, skipped, next_seq) = thread::scope(|scope| {
        let shared = &shared;
        for _ in 0..producers {
            let page_rx = page_rx.clone();
            let id_tx = id_tx.clone();
            scope.spawn(move || produce(stages, shared, &page_rx, &id_tx, retmax));
        }
        drop(id_tx);

        for _ in 0..parsers {
            let id_rx = id_rx.clone();
            let record_tx = record_tx.clone();
            scope.spawn(move || parse(stages, shared, &id_rx, &record_tx));
        }
        drop(id_rx);
        drop(record_tx);

        consume(stages, shared, record_rx, total)
    });

    let failure = shared
        .failure
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(err) = failure {
        return Err(err);
    }
    if cancel.is_cancelled() {
        return Err(SraGraphError::Aborted);
    }
    Ok(PipelineReport {
        total,
        consumed,
        skipped,
        first_seq: settings.start_seq,
        next_seq,
    })
}

fn produce<S: Stages>(
    stages: &S,
    shared: &Shared<'_>,
    pages: &Receiver<u64>,
    ids: &Sender<String>,
    retmax: usize,
) {
    while !shared.stop.is_set() {
        let Ok(retstart) = pages.try_recv() else {
            break;
        };
        let listed = match shared.paced(|| stages.list_ids(retstart, retmax)) {
            Ok(listed) => listed,
            Err(SraGraphError::Aborted) if shared.stop.is_set() => return,
            Err(err) => {
                shared.fail("producer", err);
                return;
            }
        };
        debug!(retstart, ids = listed.len(), "page listed");
        for id in listed {
            if !shared.stop.send(ids, id) {
                return;
            }
        }
        let done = shared.pages_done.fetch_add(1, Ordering::SeqCst) + 1;
        shared.sink.event(ProgressEvent::Stage {
            stage: Stage::Producer,
            completed: done,
            total: shared.pages,
        });
    }
}

fn parse<S: Stages>(
    stages: &S,
    shared: &Shared<'_>,
    ids: &Receiver<String>,
    records: &Sender<S::Record>,
) {
    let batch_size = shared.settings.batch.max(1);
    loop {
        let Some(first) = shared.stop.recv(ids) else {
            break;
        };
        let mut batch = Vec::with_capacity(batch_size);
        batch.push(first);
        while batch.len() < batch_size {
            match ids.try_recv() {
                Ok(id) => batch.push(id),
                Err(_) => break,
            }
        }

        let fetched = match shared.paced(|| stages.fetch(&batch)) {
            Ok(fetched) => fetched,
            Err(SraGraphError::Aborted) if shared.stop.is_set() => return,
            Err(err) => {
                shared.fail("parser", err);
                return;
            }
        };
        debug!(ids = batch.len(), records = fetched.len(), "batch fetched");
        for record in fetched {
            if !shared.stop.send(records, record) {
                return;
            }
        }
    }
    if shared.stop.is_set() {
        return;
    }
    let done = shared.parsers_done.fetch_add(1, Ordering::SeqCst) + 1;
    shared.sink.event(ProgressEvent::Stage {
        stage: Stage::Parser,
        completed: done,
        total: shared.parsers,
    });
}

fn consume<S: Stages>(
    stages: &S,
    shared: &Shared<'_>,
    records: Receiver<S::Record>,
    total: u64,
) -> (u64, u64, i64) {
    let mut seq = shared.settings.start_seq;
    let mut consumed = 0u64;
    let mut skipped = 0u64;
    while let Some(record) = shared.stop.recv(&records) {
        if shared.stop.is_set() {
            break;
        }
        match stages.consume(record, seq) {
            Ok(Consumed::Written) => {
                seq += 1;
                consumed += 1;
                shared.sink.event(ProgressEvent::Stage {
                    stage: Stage::Consumer,
                    completed: consumed,
                    total,
                });
            }
            Ok(Consumed::Skipped) => skipped += 1,
            Err(err) => {
                shared.fail("consumer", err);
                break;
            }
        }
    }
    (consumed, skipped, seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_disconnects_signal() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.signal().recv().is_err());
    }

    #[test]
    fn stop_sleep_returns_early_when_cancelled() {
        let stop = Stop {
            user: CancelToken::new(),
            fault: CancelToken::new(),
        };
        stop.fault.cancel();
        let started = Instant::now();
        stop.sleep(Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

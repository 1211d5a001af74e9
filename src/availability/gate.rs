//! Availability gate: owns the booked-date fetch for the visible window.
//!
//! Each `request` is tagged with a new generation and the previous fetch task
//! is aborted. Finished fetches come back over a channel; only the one whose
//! generation matches the latest request is ever applied, so a slow response
//! for a month the user already paged away from cannot overwrite fresh data.

use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{load_booked_dates, AvailabilityError, BookedDateSet, BookedDatesSource};
use crate::calendar::YearMonth;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Idle,
    Loading,
    Ready,
    /// The fetch failed; the set is empty and every free-looking date is
    /// selectable. The server rejects conflicts at submission time.
    Degraded(String),
}

#[derive(Debug)]
struct Loaded {
    generation: u64,
    window:     YearMonth,
    result:     Result<BookedDateSet, AvailabilityError>,
}

pub struct AvailabilityGate {
    source:     Arc<dyn BookedDatesSource>,
    villa_id:   String,
    generation: u64,
    window:     Option<YearMonth>,
    booked:     BookedDateSet,
    status:     LoadStatus,
    inflight:   Option<JoinHandle<()>>,
    tx:         mpsc::UnboundedSender<Loaded>,
    rx:         mpsc::UnboundedReceiver<Loaded>,
}

impl AvailabilityGate {
    pub fn new(source: Arc<dyn BookedDatesSource>, villa_id: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            source,
            villa_id:   villa_id.into(),
            generation: 0,
            window:     None,
            booked:     BookedDateSet::default(),
            status:     LoadStatus::Idle,
            inflight:   None,
            tx, rx,
        }
    }

    pub fn villa_id(&self) -> &str              { &self.villa_id }
    pub fn booked(&self)   -> &BookedDateSet    { &self.booked }
    pub fn status(&self)   -> &LoadStatus       { &self.status }
    pub fn window(&self)   -> Option<YearMonth> { self.window }
    pub fn is_loading(&self) -> bool { self.status == LoadStatus::Loading }

    /// True when the applied set was fetched for a window holding every day
    /// from `from` to `to`. While a newer request is loading the set still
    /// belongs to the previous window and proves nothing.
    pub fn covers(&self, from: NaiveDate, to: NaiveDate) -> bool {
        let settled = matches!(self.status, LoadStatus::Ready | LoadStatus::Degraded(_));
        settled && self.window.is_some_and(|w| {
            w.first_day() <= from && to < w.next().next().first_day()
        })
    }

    /// Start fetching `window` and the month after it. Supersedes any
    /// request still in flight. Must be called inside a tokio runtime.
    pub fn request(&mut self, window: YearMonth) {
        self.abort_inflight();
        self.generation += 1;
        self.window = Some(window);
        self.status = LoadStatus::Loading;

        let generation = self.generation;
        let source     = Arc::clone(&self.source);
        let villa_id   = self.villa_id.clone();
        let tx         = self.tx.clone();
        tracing::debug!("availability request #{generation} for {villa_id} from {window}");

        self.inflight = Some(tokio::spawn(async move {
            let result = load_booked_dates(source.as_ref(), &villa_id, window).await;
            // Receiver gone means the gate was dropped; nothing to apply to.
            let _ = tx.send(Loaded { generation, window, result });
        }));
    }

    /// Apply whatever has finished, without waiting. Returns true if the
    /// booked set or status changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(msg) = self.rx.try_recv() {
            changed |= self.apply(msg);
        }
        changed
    }

    /// Wait until the latest request has been applied.
    pub async fn settle(&mut self) {
        while self.status == LoadStatus::Loading {
            match self.rx.recv().await {
                Some(msg) => { self.apply(msg); }
                None      => break,
            }
        }
    }

    /// Forget the current window. Results still in flight become inert.
    pub fn close(&mut self) {
        self.abort_inflight();
        self.generation += 1;
        self.window = None;
        self.booked = BookedDateSet::default();
        self.status = LoadStatus::Idle;
    }

    fn apply(&mut self, msg: Loaded) -> bool {
        if msg.generation != self.generation {
            tracing::debug!(
                "dropping stale availability #{} for {} (current #{})",
                msg.generation, msg.window, self.generation,
            );
            return false;
        }
        self.inflight = None;
        match msg.result {
            Ok(set) => {
                tracing::info!("{} booked dates for {} from {}", set.len(), self.villa_id, msg.window);
                self.booked = set;
                self.status = LoadStatus::Ready;
            }
            Err(e) => {
                tracing::warn!("availability for {} from {} failed: {e}", self.villa_id, msg.window);
                self.booked = BookedDateSet::default();
                self.status = LoadStatus::Degraded(e.to_string());
            }
        }
        true
    }

    fn abort_inflight(&mut self) {
        if let Some(handle) = self.inflight.take() {
            handle.abort();
        }
    }
}

impl Drop for AvailabilityGate {
    fn drop(&mut self) { self.abort_inflight(); }
}

mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod recurrence;
mod store;

pub use availability::{LocalWindow, check_coach_rules, check_gender, check_studio_hours};
pub use conflict::{Candidate, detect_conflicts};
pub use error::{Entity, SchedulingError};
pub use recurrence::{RecurrenceSpec, ceiling, expand};
pub use store::Schedule;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::SchedulingConfig;
use crate::directory::*;
use crate::ledger::CreditLedger;
use crate::model::*;
use crate::notify::{Notice, NotifyHub, Outbox};
use crate::wal::Wal;

pub type SharedSchedule = Arc<RwLock<Schedule>>;

/// Everything the engine reads but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub studios: Arc<dyn StudioDirectory>,
    pub rooms: Arc<dyn RoomDirectory>,
    pub coaches: Arc<dyn CoachDirectory>,
    pub clients: Arc<dyn ClientDirectory>,
    pub settings: Arc<dyn TenantSettingsStore>,
    pub ledger: Arc<dyn CreditLedger>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// All directory lookups served by one in-memory directory.
    pub fn in_memory(
        directory: Arc<InMemoryDirectory>,
        ledger: Arc<dyn CreditLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            studios: directory.clone(),
            rooms: directory.clone(),
            coaches: directory.clone(),
            clients: directory.clone(),
            settings: directory,
            ledger,
            clock,
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: ScheduleEvent,
        response: oneshot::Sender<io::Result<()>>,
    },
    Control(WalControl),
}

pub(super) enum WalControl {
    Compact {
        events: Vec<ScheduleEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (ScheduleEvent, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, write the
/// batch with a single fsync, then answer every sender. A control command
/// found while draining runs after the batch is flushed.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            WalCommand::Control(ctl) => {
                handle_control(&mut wal, ctl);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(WalCommand::Control(ctl)) => {
                    deferred = Some(ctl);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(ctl) = deferred {
            handle_control(&mut wal, ctl);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so the partial batch does not leak
    // into the next one; every caller of this batch is told it failed.
    let flush_err = wal.flush_sync().err();
    match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn respond_batch(batch: Vec<Pending>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, ctl: WalControl) {
    match ctl {
        WalControl::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            if result.is_ok() {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            }
            let _ = response.send(result);
        }
        WalControl::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
    }
}

/// The scheduling engine: one [`Schedule`] per tenant, persisted through a
/// shared WAL, validated against the collaborator directories.
pub struct Engine {
    schedules: DashMap<Ulid, SharedSchedule>,
    wal_tx: mpsc::Sender<WalCommand>,
    notify: Arc<NotifyHub>,
    outbox: Outbox,
    collab: Collaborators,
    config: SchedulingConfig,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must be called
    /// inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        collab: Collaborators,
        notify: Arc<NotifyHub>,
        outbox: Outbox,
        config: SchedulingConfig,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Rebuild outside the locks: the schedules are not shared yet.
        let mut replayed: HashMap<Ulid, Schedule> = HashMap::new();
        for event in &events {
            replayed.entry(event.tenant_id()).or_default().apply_event(event);
        }
        let schedules = DashMap::new();
        for (tenant_id, schedule) in replayed {
            schedules.insert(tenant_id, Arc::new(RwLock::new(schedule)));
        }
        metrics::gauge!(crate::observability::SCHEDULES_LOADED).set(schedules.len() as f64);
        tracing::info!(
            events = events.len(),
            tenants = schedules.len(),
            "replayed {}",
            wal_path.display()
        );

        Ok(Self {
            schedules,
            wal_tx,
            notify,
            outbox,
            collab,
            config,
        })
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    pub(super) fn now(&self) -> DateTime<Utc> {
        self.collab.clock.now()
    }

    pub(super) fn local_window(&self, span: &Span) -> LocalWindow {
        LocalWindow::of(span, self.config.utc_offset)
    }

    /// The tenant's schedule, created empty on first use.
    pub(super) fn schedule(&self, tenant_id: Ulid) -> SharedSchedule {
        if let Some(s) = self.schedules.get(&tenant_id) {
            return s.value().clone();
        }
        let schedule = self.schedules.entry(tenant_id).or_default().value().clone();
        metrics::gauge!(crate::observability::SCHEDULES_LOADED).set(self.schedules.len() as f64);
        schedule
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &ScheduleEvent) -> Result<(), SchedulingError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| SchedulingError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| SchedulingError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| SchedulingError::Wal(e.to_string()))
    }

    /// WAL-append, apply, broadcast. The caller holds the tenant's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        schedule: &mut Schedule,
        event: &ScheduleEvent,
    ) -> Result<(), SchedulingError> {
        self.wal_append(event).await?;
        schedule.apply_event(event);
        self.notify.send(event);
        Ok(())
    }

    pub(super) fn publish(&self, notice: Notice) {
        self.outbox.publish(notice);
    }

    /// Rewrite the WAL as the minimal event set for the current state.
    ///
    /// Every tenant's write lock is held until the new log is in place, so no
    /// commit can land between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), SchedulingError> {
        let mut tenants: Vec<(Ulid, SharedSchedule)> =
            self.schedules.iter().map(|e| (*e.key(), e.value().clone())).collect();
        tenants.sort_by_key(|(id, _)| *id);

        let mut guards = Vec::with_capacity(tenants.len());
        for (_, schedule) in &tenants {
            guards.push(schedule.write().await);
        }
        let events: Vec<ScheduleEvent> = guards.iter().flat_map(|g| g.snapshot_events()).collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Control(WalControl::Compact { events, response: tx }))
            .await
            .map_err(|_| SchedulingError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| SchedulingError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| SchedulingError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::Control(WalControl::AppendsSinceCompact { response: tx }))
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

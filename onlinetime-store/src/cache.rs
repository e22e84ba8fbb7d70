//! Accumulating online time cache.
//!
//! Open sessions live only in memory, keyed by player, holding the wall-clock
//! millisecond at which the session started accruing. Live totals are the
//! ledger value plus the elapsed time of the open session. Sessions are folded
//! into the ledger when they stop, on every flush (the session stays open), and
//! once more on close.

use std::collections::HashMap;

use scc::hash_map::Entry;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::models::owed_seconds;
use crate::storage::TimeStorage;

pub struct AccumulatingTimeStorage {
    ledger: TimeStorage,
    /// Open sessions: player -> session start (unix millis).
    sessions: scc::HashMap<Uuid, i64>,
    /// Seconds whose ledger write failed; retried by the next flush.
    pending: scc::HashMap<Uuid, i64>,
}

impl AccumulatingTimeStorage {
    pub fn new(ledger: TimeStorage) -> Self {
        Self {
            ledger,
            sessions: scc::HashMap::new(),
            pending: scc::HashMap::new(),
        }
    }

    pub fn ledger(&self) -> &TimeStorage {
        &self.ledger
    }

    /// Stored seconds plus the live elapsed time of an open session.
    ///
    /// The session entry stays locked while the ledger is read, so a stop or
    /// restart of the same player is observed either fully or not at all. A
    /// periodic flush can still undercount by the batch in flight until its
    /// ledger write lands.
    pub async fn get_time(&self, id: Uuid, now: i64) -> Result<i64> {
        let session = self.sessions.entry_async(id).await;
        let live = match &session {
            Entry::Occupied(entry) => owed_seconds(*entry.get(), now),
            Entry::Vacant(_) => 0,
        };
        let stored = self.ledger.get_time(id).await?.unwrap_or(0);
        let pending = self.pending.read_async(&id, |_, s| *s).await.unwrap_or(0);
        drop(session);
        Ok(stored.saturating_add(live).saturating_add(pending))
    }

    /// Credit `delta` seconds. An open session absorbs the delta by moving its
    /// start backwards; otherwise it is written straight to the ledger.
    pub async fn add_time(&self, id: Uuid, delta: i64) -> Result<()> {
        if self.absorb(id, delta).await? {
            debug!(%id, delta, "absorbed time into open session");
            return Ok(());
        }
        self.ledger.add_time(id, delta).await
    }

    pub async fn add_times(&self, deltas: &HashMap<Uuid, i64>) -> Result<()> {
        let mut direct = HashMap::with_capacity(deltas.len());
        for (id, delta) in deltas {
            if !self.absorb(*id, *delta).await? {
                direct.insert(*id, *delta);
            }
        }

        if direct.is_empty() {
            return Ok(());
        }
        self.ledger.add_times(&direct).await
    }

    /// Shift an open session's start back by `delta` seconds. Returns false
    /// when no session is open.
    async fn absorb(&self, id: Uuid, delta: i64) -> Result<bool> {
        let shifted = self
            .sessions
            .update_async(&id, |_, started| {
                let moved = delta
                    .checked_mul(1000)
                    .and_then(|millis| started.checked_sub(millis));
                if let Some(moved) = moved {
                    *started = moved;
                }
                moved.is_some()
            })
            .await;
        match shifted {
            Some(true) => Ok(true),
            Some(false) => Err(StorageError::OutOfRange { id, delta }),
            None => Ok(false),
        }
    }

    /// Open a session at `now`. A session that was still open (missed stop,
    /// reconnect race) is credited up to `now` first.
    pub async fn start_accumulating(&self, id: Uuid, now: i64) -> Result<()> {
        match self.sessions.entry_async(id).await {
            Entry::Occupied(mut entry) => {
                debug!(%id, "session restarted while open");
                let started = std::mem::replace(entry.get_mut(), now);
                // credited while the entry is held so readers never see the
                // new start without the old session's time
                self.credit(id, owed_seconds(started, now)).await
            }
            Entry::Vacant(entry) => {
                entry.insert_entry(now);
                debug!(%id, "session started");
                Ok(())
            }
        }
    }

    /// Close the session and credit its time. Stopping a session that is
    /// not open is a no-op.
    pub async fn stop_accumulating_and_save_online_time(&self, id: Uuid, now: i64) -> Result<()> {
        let Entry::Occupied(entry) = self.sessions.entry_async(id).await else {
            return Ok(());
        };
        let owed = owed_seconds(*entry.get(), now);
        debug!(%id, owed, "session stopped");
        let result = self.credit(id, owed).await;
        entry.remove_entry();
        result
    }

    /// Credit every open session up to `now` in one batch, leaving the
    /// sessions open.
    pub async fn flush_online_time_cache(&self, now: i64) -> Result<()> {
        let mut batch = HashMap::new();
        self.sessions
            .retain_async(|id, started| {
                let owed = owed_seconds(*started, now);
                if owed != 0 {
                    // advance by whole seconds so the remainder keeps accruing
                    *started = started.saturating_add(owed.saturating_mul(1000));
                    batch.insert(*id, owed);
                }
                true
            })
            .await;
        self.drain_pending(&mut batch).await;
        self.write_batch(batch).await
    }

    /// Credit and drop every open session, then close the ledger.
    pub async fn close(&self, now: i64) -> Result<()> {
        let mut batch = HashMap::new();
        self.sessions
            .retain_async(|id, started| {
                let owed = owed_seconds(*started, now);
                if owed != 0 {
                    batch.insert(*id, owed);
                }
                false
            })
            .await;
        self.drain_pending(&mut batch).await;

        let result = self.write_batch(batch).await;
        self.ledger.close().await;
        result
    }

    /// Ledger totals merged with live session time, for leaderboards.
    pub async fn get_all_time_entries(&self, now: i64) -> Result<HashMap<Uuid, i64>> {
        let mut entries = self.ledger.get_all_time_entries().await?;
        self.sessions
            .retain_async(|id, started| {
                let total = entries.entry(*id).or_insert(0);
                *total = total.saturating_add(owed_seconds(*started, now));
                true
            })
            .await;
        self.pending
            .retain_async(|id, seconds| {
                let total = entries.entry(*id).or_insert(0);
                *total = total.saturating_add(*seconds);
                true
            })
            .await;
        Ok(entries)
    }

    /// Seconds not yet in the ledger: open sessions up to `now` plus
    /// pending credits.
    pub async fn unsaved_seconds(&self, now: i64) -> i64 {
        let mut total = 0i64;
        self.sessions
            .retain_async(|_, started| {
                total = total.saturating_add(owed_seconds(*started, now));
                true
            })
            .await;
        self.pending
            .retain_async(|_, seconds| {
                total = total.saturating_add(*seconds);
                true
            })
            .await;
        total
    }

    pub async fn is_accumulating(&self, id: Uuid) -> bool {
        self.sessions.read_async(&id, |_, _| ()).await.is_some()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    async fn credit(&self, id: Uuid, seconds: i64) -> Result<()> {
        if seconds == 0 {
            return Ok(());
        }
        if let Err(e) = self.ledger.add_time(id, seconds).await {
            warn!(%id, seconds, error = %e, "failed to save online time, keeping it pending");
            self.park(id, seconds).await;
            return Err(e);
        }
        Ok(())
    }

    async fn write_batch(&self, batch: HashMap<Uuid, i64>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.ledger.add_times(&batch).await {
            warn!(count = batch.len(), error = %e, "failed to flush online time, keeping it pending");
            for (id, seconds) in batch {
                self.park(id, seconds).await;
            }
            return Err(e);
        }
        debug!(count = batch.len(), "flushed online time");
        Ok(())
    }

    async fn park(&self, id: Uuid, seconds: i64) {
        self.pending
            .entry_async(id)
            .await
            .and_modify(|s| *s = s.saturating_add(seconds))
            .or_insert(seconds);
    }

    async fn drain_pending(&self, batch: &mut HashMap<Uuid, i64>) {
        self.pending
            .retain_async(|id, seconds| {
                let owed = batch.entry(*id).or_insert(0);
                *owed = owed.saturating_add(*seconds);
                false
            })
            .await;
    }
}

//! history.rs — bounded in-memory record of recent cycles plus the live
//! status board read by `/status` (HTTP and chat command).

use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_HISTORY_CAP: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleKind {
    Scheduled,
    Forced,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub at: DateTime<Utc>,
    pub kind: CycleKind,
    pub outcome: &'static str,
    pub fetched: usize,
    pub newest_id: Option<i64>,
    pub attempted: usize,
    pub succeeded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct CycleHistory {
    inner: Mutex<VecDeque<CycleRecord>>,
    cap: usize,
}

impl CycleHistory {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    pub fn push(&self, rec: CycleRecord) {
        let mut v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        v.push_back(rec);
        while v.len() > self.cap {
            v.pop_front();
        }
    }

    /// Oldest-first slice of the last `n` records.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<CycleRecord> {
        let v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let start = v.len().saturating_sub(n);
        v.iter().skip(start).cloned().collect()
    }

    pub fn last(&self) -> Option<CycleRecord> {
        let v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        v.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct Live {
    state: &'static str,
    cursor: Option<i64>,
    last_cycle_at: Option<DateTime<Utc>>,
    faults: u64,
}

/// Shared, read-mostly view of the pipeline.
#[derive(Debug)]
pub struct StatusBoard {
    channel: String,
    started_at: DateTime<Utc>,
    live: RwLock<Live>,
    history: CycleHistory,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub channel: String,
    pub started_at: DateTime<Utc>,
    pub state: &'static str,
    pub cursor: Option<i64>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub faults: u64,
    pub active_subscribers: usize,
    pub recent_cycles: Vec<CycleRecord>,
}

impl StatusBoard {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            started_at: Utc::now(),
            live: RwLock::new(Live {
                state: "idle",
                cursor: None,
                last_cycle_at: None,
                faults: 0,
            }),
            history: CycleHistory::with_capacity(DEFAULT_HISTORY_CAP),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn set_state(&self, state: &'static str) {
        if let Ok(mut l) = self.live.write() {
            l.state = state;
        }
    }

    pub fn set_cursor(&self, cursor: Option<i64>) {
        if let Ok(mut l) = self.live.write() {
            l.cursor = cursor;
        }
    }

    pub fn record_cycle(&self, rec: CycleRecord) {
        if let Ok(mut l) = self.live.write() {
            l.last_cycle_at = Some(rec.at);
            if rec.error.is_some() {
                l.faults += 1;
            }
        }
        self.history.push(rec);
    }

    pub fn state(&self) -> &'static str {
        self.live.read().map(|l| l.state).unwrap_or("unknown")
    }

    pub fn cursor(&self) -> Option<i64> {
        self.live.read().ok().and_then(|l| l.cursor)
    }

    pub fn last_cycle_at(&self) -> Option<DateTime<Utc>> {
        self.live.read().ok().and_then(|l| l.last_cycle_at)
    }

    pub fn history(&self) -> &CycleHistory {
        &self.history
    }

    pub fn snapshot(&self, active_subscribers: usize, recent: usize) -> StatusSnapshot {
        let live = self
            .live
            .read()
            .map(|l| l.clone())
            .unwrap_or_else(|p| p.into_inner().clone());
        StatusSnapshot {
            channel: self.channel.clone(),
            started_at: self.started_at,
            state: live.state,
            cursor: live.cursor,
            last_cycle_at: live.last_cycle_at,
            faults: live.faults,
            active_subscribers,
            recent_cycles: self.history.snapshot_last_n(recent),
        }
    }
}

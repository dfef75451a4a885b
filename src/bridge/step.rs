//! Step lineages: ordering of round trips on the single-threaded host
//!
//! A [`Step`] is the capability to talk to the host next within one logical
//! sequence. Clones share the lineage; round trips entered through the same
//! lineage run one at a time, in the order they asked for their turn.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::error::UsageError;

/// What to do when a lineage is entered while another round trip holds it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepConflictPolicy {
    /// Wait for the turn, first come first served
    #[default]
    Queue,
    /// Fail fast with [`UsageError::StepConflict`]
    Reject,
}

/// Lineage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineageId(pub Uuid);

impl LineageId {
    /// Create a new random LineageId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LineageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LineageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Lineage {
    id: LineageId,
    parent: Option<LineageId>,
    // tokio's mutex queues waiters fairly, which gives FIFO turns.
    gate: Mutex<()>,
    round_trips: AtomicU64,
}

/// Ordering capability for one logical sequence of host interactions
#[derive(Clone)]
pub struct Step {
    lineage: Arc<Lineage>,
}

impl Step {
    /// Start a new lineage
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    /// Start a new lineage that records `self` as its parent
    ///
    /// Callbacks run on child steps: the parent may still be waiting on the
    /// operation that registered them.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.lineage.id))
    }

    fn with_parent(parent: Option<LineageId>) -> Self {
        Self {
            lineage: Arc::new(Lineage {
                id: LineageId::new(),
                parent,
                gate: Mutex::new(()),
                round_trips: AtomicU64::new(0),
            }),
        }
    }

    /// Lineage identifier
    pub fn lineage(&self) -> LineageId {
        self.lineage.id
    }

    /// Parent lineage, for steps created with [`Step::child`]
    pub fn parent(&self) -> Option<LineageId> {
        self.lineage.parent
    }

    /// Round trips completed through this lineage
    pub fn round_trips(&self) -> u64 {
        self.lineage.round_trips.load(Ordering::SeqCst)
    }

    /// Check whether two steps belong to the same lineage
    pub fn same_lineage(&self, other: &Step) -> bool {
        Arc::ptr_eq(&self.lineage, &other.lineage)
    }

    /// Wait for this lineage's turn to talk to the host
    pub async fn enter(&self, policy: StepConflictPolicy) -> Result<Turn<'_>, UsageError> {
        let guard = match policy {
            StepConflictPolicy::Queue => self.lineage.gate.lock().await,
            StepConflictPolicy::Reject => {
                self.lineage
                    .gate
                    .try_lock()
                    .map_err(|_| UsageError::StepConflict {
                        lineage: self.lineage.id.to_string(),
                    })?
            }
        };

        Ok(Turn {
            _guard: guard,
            round_trips: &self.lineage.round_trips,
        })
    }
}

impl Default for Step {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("lineage", &self.lineage.id)
            .field("parent", &self.lineage.parent)
            .field("round_trips", &self.round_trips())
            .finish()
    }
}

/// Exclusive turn on a lineage, held for exactly one round trip
pub struct Turn<'a> {
    _guard: MutexGuard<'a, ()>,
    round_trips: &'a AtomicU64,
}

impl Turn<'_> {
    /// Mark the round trip as completed
    pub fn complete(self) {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
    }
}

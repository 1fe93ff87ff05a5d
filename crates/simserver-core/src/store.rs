//! Accumulation stores shared between the engine thread and the reader
//!
//! Three independent stores, each behind its own lock:
//! - the vector group store (announced groups and their pending samples)
//! - the output log (engine text)
//! - the running flag
//!
//! Every lock is held for a single append, drain or flag operation only.

use crate::types::{
    ExitNotice, GroupData, SampleValue, ValueKind, VectorData, VectorSnapshot,
};
use num_complex::Complex64;
use parking_lot::Mutex;
use tracing::{debug, warn};

// ============================================================================
// Vector groups
// ============================================================================

/// Accumulator for one named vector
#[derive(Debug, Clone)]
struct VectorSlot {
    name: String,
    /// Fixed by the first sample, kept across drains
    kind: Option<ValueKind>,
    real: Vec<f64>,
    complex: Vec<Complex64>,
}

impl VectorSlot {
    fn new(name: String) -> Self {
        Self {
            name,
            kind: None,
            real: Vec::new(),
            complex: Vec::new(),
        }
    }

    /// Append one value. Returns true if the value had to be coerced to the
    /// kind fixed by an earlier sample.
    fn push(&mut self, value: &SampleValue) -> bool {
        let incoming = if value.is_complex {
            ValueKind::Complex
        } else {
            ValueKind::Real
        };
        let kind = *self.kind.get_or_insert(incoming);
        match kind {
            ValueKind::Real => self.real.push(value.real),
            ValueKind::Complex => self.complex.push(Complex64::new(value.real, value.imag)),
        }
        kind != incoming
    }

    fn pending(&self) -> usize {
        self.real.len() + self.complex.len()
    }

    fn drain(&mut self) -> VectorData {
        match self.kind {
            Some(ValueKind::Complex) => VectorData::Complex(std::mem::take(&mut self.complex)),
            _ => VectorData::Real(std::mem::take(&mut self.real)),
        }
    }
}

/// One batch of vectors announced together by the engine
#[derive(Debug, Clone)]
pub struct VectorGroup {
    name: String,
    slots: Vec<VectorSlot>,
    scale_index: Option<usize>,
}

impl VectorGroup {
    pub fn new<S: Into<String>>(name: impl Into<String>, fieldnames: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            slots: fieldnames
                .into_iter()
                .map(|n| VectorSlot::new(n.into()))
                .collect(),
            scale_index: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vector names in announcement order
    pub fn fieldnames(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.name.as_str())
    }

    pub fn vector_count(&self) -> usize {
        self.slots.len()
    }

    /// Name of the scale vector, once flagged
    pub fn scale_name(&self) -> Option<&str> {
        self.scale_index
            .and_then(|i| self.slots.get(i))
            .map(|s| s.name.as_str())
    }

    /// Kind of the vector at `index`, if it has received a sample
    pub fn kind(&self, index: usize) -> Option<ValueKind> {
        self.slots.get(index).and_then(|s| s.kind)
    }

    /// Samples waiting to be drained across all vectors
    pub fn pending_samples(&self) -> usize {
        self.slots.iter().map(VectorSlot::pending).sum()
    }

    /// Append one sample batch, positionally. Returns the number of values
    /// beyond the announced vector count, which are dropped.
    pub fn append(&mut self, values: &[SampleValue]) -> usize {
        let mut coerced = 0usize;
        for (index, (slot, value)) in self.slots.iter_mut().zip(values).enumerate() {
            if value.is_scale {
                self.scale_index = Some(index);
            }
            if slot.push(value) {
                coerced += 1;
            }
        }
        if coerced > 0 {
            debug!(group = %self.name, coerced, "Coerced samples to fixed vector kind");
        }
        values.len().saturating_sub(self.slots.len())
    }

    /// Take pending samples, keeping names, kinds and the scale index
    pub fn drain(&mut self) -> GroupData {
        GroupData {
            name: self.name.clone(),
            scale: self.scale_name().map(str::to_string),
            vectors: self
                .slots
                .iter_mut()
                .map(|slot| VectorSnapshot {
                    name: slot.name.clone(),
                    data: slot.drain(),
                })
                .collect(),
        }
    }
}

/// Vector groups of the current run, in arrival order
#[derive(Debug, Default)]
pub struct VectorGroupStore {
    groups: Vec<VectorGroup>,
}

impl VectorGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announce(&mut self, group: VectorGroup) {
        self.groups.push(group);
    }

    /// Append a sample batch to the most recently announced group.
    ///
    /// Returns the number of dropped values.
    pub fn append(&mut self, values: &[SampleValue]) -> usize {
        match self.groups.last_mut() {
            Some(group) => {
                let dropped = group.append(values);
                if dropped > 0 {
                    warn!(
                        group = %group.name,
                        dropped,
                        vectors = group.vector_count(),
                        "Sample batch wider than announced vector count"
                    );
                }
                dropped
            }
            None => {
                warn!(values = values.len(), "Sample batch before any vector announcement");
                values.len()
            }
        }
    }

    pub fn groups(&self) -> &[VectorGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn pending_samples(&self) -> usize {
        self.groups.iter().map(VectorGroup::pending_samples).sum()
    }

    /// Snapshot-and-clear the samples of every group
    pub fn drain(&mut self) -> Vec<GroupData> {
        self.groups.iter_mut().map(VectorGroup::drain).collect()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

// ============================================================================
// Output log
// ============================================================================

/// Engine text accumulated since the last drain
#[derive(Debug, Default)]
pub struct OutputLog {
    text: String,
}

impl OutputLog {
    pub fn push_line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
    }

    pub fn drain(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// Run phase as tracked by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Running,
    Exited(ExitNotice),
    Closed,
}

/// Phase plus bookkeeping for the outstanding result handle
#[derive(Debug)]
pub(crate) struct Lifecycle {
    pub phase: Phase,
    /// Incremented for every accepted command
    pub run: u64,
    /// Whether the handle for `run` is alive and has not seen `more = false`
    pub outstanding: bool,
}

/// Stores shared by a session, its result handles and its callback adapter.
///
/// Lock order when more than one is needed: `running`, `groups`, `log`.
/// `lifecycle` is never held together with another lock.
#[derive(Debug)]
pub(crate) struct SharedState {
    pub running: Mutex<bool>,
    pub groups: Mutex<VectorGroupStore>,
    pub log: Mutex<OutputLog>,
    pub lifecycle: Mutex<Lifecycle>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(false),
            groups: Mutex::new(VectorGroupStore::new()),
            log: Mutex::new(OutputLog::default()),
            lifecycle: Mutex::new(Lifecycle {
                phase: Phase::Idle,
                run: 0,
                outstanding: false,
            }),
        }
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.lock().phase
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    pub fn set_running(&self, running: bool) {
        *self.running.lock() = running;
    }

    /// Discard everything left from a previous run
    pub fn clear_data(&self) {
        self.groups.lock().clear();
        self.log.lock().clear();
    }
}

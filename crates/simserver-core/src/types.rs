//! Common types shared by the session, the stores and the engine bindings

use num_complex::Complex64;

#[cfg(feature = "serde")]
use serde::Serialize;

// ============================================================================
// Enums
// ============================================================================

/// Vector data - either real or complex
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", content = "samples", rename_all = "lowercase"))]
pub enum VectorData {
    Real(Vec<f64>),
    Complex(Vec<Complex64>),
}

impl VectorData {
    /// Number of samples
    pub fn len(&self) -> usize {
        match self {
            VectorData::Real(v) => v.len(),
            VectorData::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, VectorData::Complex(_))
    }

    /// Real samples, if this vector is real-valued
    pub fn as_real(&self) -> Option<&[f64]> {
        match self {
            VectorData::Real(v) => Some(v),
            VectorData::Complex(_) => None,
        }
    }

    /// Complex samples, if this vector is complex-valued
    pub fn as_complex(&self) -> Option<&[Complex64]> {
        match self {
            VectorData::Complex(v) => Some(v),
            VectorData::Real(_) => None,
        }
    }

    /// Append another delta of the same kind.
    ///
    /// A real delta appended to complex data is widened with a zero imaginary
    /// part; a complex delta appended to real data keeps only the real part.
    pub fn extend_from(&mut self, other: &VectorData) {
        match (self, other) {
            (VectorData::Real(a), VectorData::Real(b)) => a.extend_from_slice(b),
            (VectorData::Complex(a), VectorData::Complex(b)) => a.extend_from_slice(b),
            (VectorData::Complex(a), VectorData::Real(b)) => {
                a.extend(b.iter().map(|re| Complex64::new(*re, 0.0)))
            }
            (VectorData::Real(a), VectorData::Complex(b)) => a.extend(b.iter().map(|c| c.re)),
        }
    }
}

/// Value kind of a vector, fixed by its first sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum ValueKind {
    Real,
    Complex,
}

/// Point spacing for AC and noise sweeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum SweepMode {
    Linear,
    Octave,
    Decade,
}

impl SweepMode {
    /// Keyword used on the engine command line
    pub fn keyword(self) -> &'static str {
        match self {
            SweepMode::Linear => "lin",
            SweepMode::Octave => "oct",
            SweepMode::Decade => "dec",
        }
    }
}

impl std::str::FromStr for SweepMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lin" | "linear" => Ok(SweepMode::Linear),
            "oct" | "octave" => Ok(SweepMode::Octave),
            "dec" | "decade" => Ok(SweepMode::Decade),
            other => Err(format!("unknown sweep mode '{}'", other)),
        }
    }
}

/// Observable lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum SessionState {
    /// Ready to accept a command
    Idle,
    /// A command was accepted and the engine has not reported halt yet
    Running,
    /// The engine stopped but the last samples have not been read
    Draining,
    /// The engine terminated unrecoverably
    Exited,
    /// The session was torn down
    Closed,
}

// ============================================================================
// Engine-facing records
// ============================================================================

/// One value of one vector in a sample batch, in announcement order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleValue {
    pub real: f64,
    pub imag: f64,
    pub is_scale: bool,
    pub is_complex: bool,
}

impl SampleValue {
    pub fn real(value: f64) -> Self {
        Self {
            real: value,
            imag: 0.0,
            is_scale: false,
            is_complex: false,
        }
    }

    pub fn complex(value: Complex64) -> Self {
        Self {
            real: value.re,
            imag: value.im,
            is_scale: false,
            is_complex: true,
        }
    }

    /// Mark this value as belonging to the scale vector
    pub fn scale(mut self) -> Self {
        self.is_scale = true;
        self
    }
}

/// Fatal exit notice reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ExitNotice {
    pub status: i32,
    pub immediate: bool,
    pub exit_upon_quit: bool,
}

/// A circuit description file handed over by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitFile {
    pub name: String,
    pub contents: Vec<u8>,
}

impl CircuitFile {
    pub fn new(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

// ============================================================================
// Read results
// ============================================================================

/// Samples of one vector accumulated since the previous read
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct VectorSnapshot {
    pub name: String,
    pub data: VectorData,
}

/// One vector group in a read result
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct GroupData {
    pub name: String,
    /// Name of the scale vector, once the engine has flagged one
    pub scale: Option<String>,
    pub vectors: Vec<VectorSnapshot>,
}

impl GroupData {
    /// Get a vector of this group by name
    pub fn get(&self, name: &str) -> Option<&VectorData> {
        self.vectors
            .iter()
            .find(|v| v.name == name)
            .map(|v| &v.data)
    }
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ReadResult {
    /// Whether the engine is still running
    pub more: bool,
    /// Engine text emitted since the previous read, one line per message.
    ///
    /// The engine hands text over as C strings; bytes that are not valid
    /// UTF-8 are replaced with U+FFFD when the line is received.
    pub stdout: String,
    /// Vector groups in arrival order
    pub groups: Vec<GroupData>,
}

impl ReadResult {
    /// Find a vector by name in the most recent group that has it
    pub fn get(&self, name: &str) -> Option<&VectorData> {
        self.groups.iter().rev().find_map(|g| g.get(name))
    }

    /// Total number of samples in this delta
    pub fn sample_count(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| g.vectors.iter())
            .map(|v| v.data.len())
            .sum()
    }
}

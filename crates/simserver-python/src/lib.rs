//! Python bindings for the simulation session
//!
//! This crate provides PyO3 bindings exposing simserver-core, driven by the
//! libngspice engine from simserver-ffi.

use numpy::ndarray::Array1;
use numpy::IntoPyArray;
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict, PyList};
use simserver_core::{
    AnalysisRequest, Capture, CircuitFile, ReadResult, RunHandle, SessionConfig, SimError,
    Simulator, SweepMode, VectorData,
};
use simserver_ffi::{init_logging, NgspiceConfig, NgspiceEngine};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

type BoxedFactory = Box<dyn FnMut() -> simserver_core::Result<NgspiceEngine>>;

// ============================================================================
// Python Classes
// ============================================================================

/// Python wrapper owning the loaded circuit
#[pyclass(name = "Simulator", unsendable)]
pub struct PySimulator {
    inner: Simulator<BoxedFactory>,
    generation: u64,
}

#[pymethods]
impl PySimulator {
    #[new]
    #[pyo3(signature = (library=None, work_dir=None))]
    fn new(library: Option<PathBuf>, work_dir: Option<PathBuf>) -> Self {
        let mut engine_config = NgspiceConfig::from_env();
        if let Some(library) = library {
            engine_config = engine_config.with_library(library);
        }
        let mut config = SessionConfig::from_env();
        if let Some(dir) = work_dir {
            config = config.with_work_dir(dir);
        }
        let factory: BoxedFactory = Box::new(NgspiceEngine::factory(engine_config));
        PySimulator {
            inner: Simulator::new(factory, config),
            generation: 0,
        }
    }

    /// Stage circuit files and source the first one
    ///
    /// Args:
    ///     files: list of {"name": str, "contents": str | bytes}
    ///
    /// Returns:
    ///     Commands bound to the newly loaded circuit
    fn load_files(slf: Bound<'_, Self>, files: &Bound<'_, PyList>) -> PyResult<PyCommands> {
        let files = files
            .iter()
            .map(|item| circuit_file(&item))
            .collect::<PyResult<Vec<_>>>()?;

        let generation = {
            let mut this = slf.borrow_mut();
            this.inner.load_circuit(&files).map_err(to_py_err)?;
            this.generation += 1;
            this.generation
        };
        info!(files = files.len(), generation, "Circuit loaded from Python");
        Ok(PyCommands {
            simulator: slf.unbind(),
            generation,
        })
    }

    /// Whether a circuit is loaded
    fn is_loaded(&self) -> bool {
        self.inner.is_loaded()
    }

    /// Tear down the loaded circuit, halting any running analysis
    fn unload(&mut self) {
        self.inner.unload();
        self.generation += 1;
    }

    fn __repr__(&self) -> String {
        format!("Simulator(loaded={})", self.inner.is_loaded())
    }
}

/// Analysis commands for one loaded circuit
#[pyclass(name = "Commands", unsendable)]
pub struct PyCommands {
    simulator: Py<PySimulator>,
    generation: u64,
}

impl PyCommands {
    fn dispatch(
        &self,
        py: Python<'_>,
        request: AnalysisRequest,
        vectors: Option<Vec<String>>,
    ) -> PyResult<PyRunResult> {
        let mut simulator = self.simulator.borrow_mut(py);
        if simulator.generation != self.generation {
            debug!(
                generation = self.generation,
                current = simulator.generation,
                "Commands used after reload"
            );
            return Err(to_py_err(SimError::SessionClosed));
        }
        let vectors = vectors.unwrap_or_default();
        debug!(analysis = request.name(), vectors = vectors.len(), "Python dispatch");
        let handle = simulator
            .inner
            .dispatch(request, &vectors)
            .map_err(to_py_err)?;
        Ok(PyRunResult { handle })
    }
}

#[pymethods]
impl PyCommands {
    /// Run the analyses named in the circuit
    #[pyo3(signature = (vectors=None))]
    fn run(&self, py: Python<'_>, vectors: Option<Vec<String>>) -> PyResult<PyRunResult> {
        self.dispatch(py, AnalysisRequest::Run, vectors)
    }

    /// Operating point analysis
    #[pyo3(signature = (vectors=None))]
    fn op(&self, py: Python<'_>, vectors: Option<Vec<String>>) -> PyResult<PyRunResult> {
        self.dispatch(py, AnalysisRequest::OperatingPoint, vectors)
    }

    /// Transient analysis
    #[pyo3(signature = (step, stop, start=0.0, vectors=None))]
    fn tran(
        &self,
        py: Python<'_>,
        step: f64,
        stop: f64,
        start: f64,
        vectors: Option<Vec<String>>,
    ) -> PyResult<PyRunResult> {
        self.dispatch(py, AnalysisRequest::Transient { step, stop, start }, vectors)
    }

    /// DC sweep of one source
    #[pyo3(signature = (source, start, stop, increment, vectors=None))]
    fn dc(
        &self,
        py: Python<'_>,
        source: String,
        start: f64,
        stop: f64,
        increment: f64,
        vectors: Option<Vec<String>>,
    ) -> PyResult<PyRunResult> {
        let request = AnalysisRequest::DcSweep {
            source,
            start,
            stop,
            increment,
        };
        self.dispatch(py, request, vectors)
    }

    /// Small-signal AC sweep; `mode` is "lin", "oct" or "dec"
    #[pyo3(signature = (mode, points, fstart, fstop, vectors=None))]
    fn ac(
        &self,
        py: Python<'_>,
        mode: &str,
        points: u32,
        fstart: f64,
        fstop: f64,
        vectors: Option<Vec<String>>,
    ) -> PyResult<PyRunResult> {
        let request = AnalysisRequest::AcSweep {
            mode: sweep_mode(mode)?,
            points,
            fstart,
            fstop,
        };
        self.dispatch(py, request, vectors)
    }

    /// Noise analysis at `output` referred to input `source`
    #[pyo3(signature = (output, source, mode, points, fstart, fstop, vectors=None))]
    #[allow(clippy::too_many_arguments)]
    fn noise(
        &self,
        py: Python<'_>,
        output: String,
        source: String,
        mode: &str,
        points: u32,
        fstart: f64,
        fstop: f64,
        vectors: Option<Vec<String>>,
    ) -> PyResult<PyRunResult> {
        let request = AnalysisRequest::Noise {
            output,
            source,
            mode: sweep_mode(mode)?,
            points,
            fstart,
            fstop,
        };
        self.dispatch(py, request, vectors)
    }

    fn __repr__(&self, py: Python<'_>) -> String {
        let current = self.simulator.borrow(py).generation == self.generation;
        format!("Commands(current={})", if current { "True" } else { "False" })
    }
}

/// Result stream of one accepted command
#[pyclass(name = "Result", unsendable)]
pub struct PyRunResult {
    handle: RunHandle,
}

#[pymethods]
impl PyRunResult {
    /// Everything produced since the previous read
    ///
    /// Returns:
    ///     dict with keys "more", "stdout" and "data"
    fn read(&self, py: Python<'_>) -> PyResult<Py<PyDict>> {
        let delta = self.handle.read().map_err(to_py_err)?;
        read_result_to_dict(py, &delta)
    }

    /// Poll until the run finishes and return the merged result
    ///
    /// The GIL is released between polls.
    #[pyo3(signature = (interval=0.05))]
    fn read_all(&self, py: Python<'_>, interval: f64) -> PyResult<Py<PyDict>> {
        if !interval.is_finite() || interval < 0.0 {
            return Err(PyValueError::new_err("interval must be a non-negative number"));
        }
        let pause = Duration::from_secs_f64(interval);
        let mut capture = Capture::new();
        loop {
            let delta = self.handle.read().map_err(to_py_err)?;
            let more = delta.more;
            capture.absorb(delta);
            if !more {
                break;
            }
            py.allow_threads(|| std::thread::sleep(pause));
            py.check_signals()?;
        }
        read_result_to_dict(py, &capture.into_result())
    }

    #[getter]
    fn run_id(&self) -> u64 {
        self.handle.run_id()
    }

    fn __repr__(&self) -> String {
        format!("Result(run={})", self.handle.run_id())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn to_py_err(e: SimError) -> PyErr {
    match e {
        SimError::InvalidRequest(_) | SimError::InvalidFileName(_) => {
            PyValueError::new_err(e.to_string())
        }
        SimError::Io(_) => PyIOError::new_err(e.to_string()),
        _ => PyRuntimeError::new_err(e.to_string()),
    }
}

fn sweep_mode(mode: &str) -> PyResult<SweepMode> {
    mode.parse::<SweepMode>().map_err(PyValueError::new_err)
}

fn circuit_file(item: &Bound<'_, PyAny>) -> PyResult<CircuitFile> {
    let entry = item.downcast::<PyDict>()?;
    let name: String = entry
        .get_item("name")?
        .ok_or_else(|| PyValueError::new_err("file entry is missing 'name'"))?
        .extract()?;
    let contents = entry
        .get_item("contents")?
        .ok_or_else(|| PyValueError::new_err("file entry is missing 'contents'"))?;
    let contents = match contents.downcast::<PyBytes>() {
        Ok(bytes) => bytes.as_bytes().to_vec(),
        Err(_) => contents.extract::<String>()?.into_bytes(),
    };
    Ok(CircuitFile::new(name, contents))
}

fn vector_to_numpy(py: Python, vector: &VectorData) -> Py<PyAny> {
    match vector {
        VectorData::Real(v) => Array1::from_vec(v.clone())
            .into_pyarray(py)
            .into_any()
            .unbind(),
        VectorData::Complex(v) => Array1::from_vec(v.clone())
            .into_pyarray(py)
            .into_any()
            .unbind(),
    }
}

fn read_result_to_dict(py: Python, result: &ReadResult) -> PyResult<Py<PyDict>> {
    let groups = PyList::empty(py);
    for group in &result.groups {
        let vectors = PyList::empty(py);
        for vector in &group.vectors {
            let entry = PyDict::new(py);
            entry.set_item("name", &vector.name)?;
            entry.set_item("data", vector_to_numpy(py, &vector.data))?;
            vectors.append(entry)?;
        }
        let entry = PyDict::new(py);
        entry.set_item("name", &group.name)?;
        entry.set_item("scale", group.scale.as_deref())?;
        entry.set_item("vectors", vectors)?;
        groups.append(entry)?;
    }

    let dict = PyDict::new(py);
    dict.set_item("more", result.more)?;
    dict.set_item("stdout", &result.stdout)?;
    dict.set_item("data", groups)?;
    Ok(dict.unbind())
}

// ============================================================================
// Module Definition
// ============================================================================

#[pymodule]
pub fn simserver(m: &Bound<'_, PyModule>) -> PyResult<()> {
    init_logging();

    m.add_class::<PySimulator>()?;
    m.add_class::<PyCommands>()?;
    m.add_class::<PyRunResult>()?;

    Ok(())
}

//! Engine capability boundary
//!
//! The session never talks to a concrete simulator. It drives an [`Engine`]:
//! something that can be bound to a [`CallbackAdapter`], accept command
//! strings, and report whether its background thread is active. The
//! `simserver-ffi` crate provides the libngspice implementation; tests use
//! scripted fakes.

use crate::callback::CallbackAdapter;
use crate::error::Result;
use std::sync::Arc;

/// Handle to a callback-driven simulation engine
pub trait Engine: Send {
    /// Bind the engine's callbacks to `callbacks`.
    ///
    /// Called exactly once, before any command. The engine may invoke the
    /// adapter from any thread until it is dropped.
    fn init(&mut self, callbacks: Arc<CallbackAdapter>) -> Result<()>;

    /// Submit one command string.
    ///
    /// Background commands (`bg_*`) return as soon as the engine has started
    /// its worker thread.
    fn command(&mut self, command: &str) -> Result<()>;

    /// Whether the engine's background thread is currently running
    fn is_running(&self) -> bool;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn init(&mut self, callbacks: Arc<CallbackAdapter>) -> Result<()> {
        (**self).init(callbacks)
    }

    fn command(&mut self, command: &str) -> Result<()> {
        (**self).command(command)
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }
}

/// Creates a fresh engine for every loaded circuit
pub trait EngineFactory {
    type Engine: Engine;

    fn create(&mut self) -> Result<Self::Engine>;
}

impl<F, E> EngineFactory for F
where
    F: FnMut() -> Result<E>,
    E: Engine,
{
    type Engine = E;

    fn create(&mut self) -> Result<E> {
        self()
    }
}

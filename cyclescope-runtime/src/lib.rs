//! Hierarchical region profiler on the hardware cycle counter.
//!
//! Bracket a region with [`begin`] / [`end`] (or hold the [`Guard`] returned
//! by [`enter`]); each distinct region name becomes an anchor that collects
//! exclusive cycles, hit count, bytes processed and its nesting depth.
//! [`print_report`] prints the result.
//!
//! The free functions use a per-thread [`Session`] configured from the
//! environment (`CYCLESCOPE=0` turns every call into a no-op). Construct a
//! [`Session`] directly for an explicitly owned session or a custom
//! [`CycleSource`].
#![allow(unsafe_code)]

mod anchor;
mod config;
mod error;
mod report;
mod session;
mod tsc;

use std::cell::RefCell;
use std::marker::PhantomData;

pub use anchor::{truncate_name, Anchor, AnchorId, AnchorTable};
pub use config::{
    Config, Switch, CALIBRATION_ENV_VAR, DEFAULT_CALIBRATION_WAIT, DEFAULT_CAPACITY,
    DEFAULT_NAME_MAX_LEN, ENABLE_ENV_VAR,
};
pub use error::Error;
pub use report::{Report, Row, Throughput, TotalRow, TOTAL_NAME};
pub use session::Session;
pub use tsc::{calibrate, CycleSource, ManualClock, Tsc, MAX_CALIBRATION_WAIT};

thread_local! {
    static SESSION: RefCell<Session<Tsc>> = RefCell::new(Session::from_env());
}

/// Run `f` against this thread's default session.
///
/// The session stays borrowed while `f` runs: the free functions called
/// from inside `f` fail with [`Error::SessionBusy`] (or do nothing, for the
/// ones that return no `Result`). Use the `&mut Session` handed to `f`
/// instead.
///
/// # Panics
///
/// Panics if called from inside another `with_session` on the same thread.
pub fn with_session<R>(f: impl FnOnce(&mut Session<Tsc>) -> R) -> R {
    SESSION.with(|s| f(&mut s.borrow_mut()))
}

fn try_with_session<R>(f: impl FnOnce(&mut Session<Tsc>) -> R) -> Result<R, Error> {
    SESSION.with(|s| {
        let mut session = s.try_borrow_mut().map_err(|_| Error::SessionBusy)?;
        Ok(f(&mut session))
    })
}

pub fn begin(name: &str) -> Result<(), Error> {
    try_with_session(|s| s.begin(name))?
}

pub fn begin_with_throughput(name: &str, bytes: u64) -> Result<(), Error> {
    try_with_session(|s| s.begin_with_throughput(name, bytes))?
}

pub fn end(name: &str) -> Result<(), Error> {
    try_with_session(|s| s.end(name))?
}

/// Snapshot of this thread's session. `None` when disabled or when the
/// session is borrowed by [`with_session`].
pub fn report() -> Option<Report> {
    match try_with_session(|s| s.report()) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!("no report: {e}");
            None
        }
    }
}

pub fn print_report() {
    if let Err(e) = try_with_session(|s| s.print_report()) {
        tracing::warn!("report not printed: {e}");
    }
}

/// Clear this thread's session, keeping its calibration.
pub fn reset() {
    if let Err(e) = try_with_session(|s| s.reset()) {
        tracing::warn!("session not reset: {e}");
    }
}

/// RAII region guard. Ends the region on drop.
///
/// Tied to the thread that created it, since the default session is
/// thread-local.
#[must_use = "dropping the guard immediately ends the region; bind it with `let _guard = ...`"]
pub struct Guard {
    name: &'static str,
    _not_send: PhantomData<*const ()>,
}

impl Drop for Guard {
    fn drop(&mut self) {
        let result = SESSION.try_with(|s| match s.try_borrow_mut() {
            Ok(mut session) => session.end(self.name),
            Err(_) => Err(Error::SessionBusy),
        });
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(region = self.name, "failed to end region: {e}"),
            Err(_) => tracing::warn!(region = self.name, "session gone before region ended"),
        }
    }
}

/// Begin `name` and return a guard that ends it.
pub fn enter(name: &'static str) -> Result<Guard, Error> {
    enter_with_throughput(name, 0)
}

pub fn enter_with_throughput(name: &'static str, bytes: u64) -> Result<Guard, Error> {
    begin_with_throughput(name, bytes)?;
    Ok(Guard {
        name,
        _not_send: PhantomData,
    })
}

//! Cycle sources: the hardware counter (TSC on x86_64, CNTVCT on aarch64)
//! and a manually driven counter for deterministic tests.
//!
//! `calibrate()` derives the counter frequency by spinning for a short,
//! fixed wall-clock interval measured with `Instant`.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::Error;

/// Longest calibration spin we accept.
pub const MAX_CALIBRATION_WAIT: Duration = Duration::from_secs(1);

/// A free-running, monotonically increasing counter.
pub trait CycleSource {
    /// Current counter value.
    fn read(&self) -> u64;

    /// Ticks per second when known up front. `None` means the frequency
    /// has to be measured with [`calibrate`].
    fn nominal_frequency(&self) -> Option<u64> {
        None
    }
}

/// The platform's hardware cycle counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tsc;

impl CycleSource for Tsc {
    #[inline(always)]
    fn read(&self) -> u64 {
        read()
    }

    fn nominal_frequency(&self) -> Option<u64> {
        // The fallback counter already ticks in nanoseconds.
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            Some(1_000_000_000)
        }
        #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
        {
            None
        }
    }
}

/// Read the hardware cycle counter. Single inline instruction on both
/// x86_64 (`rdtsc`) and aarch64 (`mrs cntvct_el0`).
#[inline(always)]
pub fn read() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
    #[cfg(target_arch = "aarch64")]
    {
        let val: u64;
        unsafe { core::arch::asm!("mrs {}, cntvct_el0", out(reg) val) };
        val
    }
    // Fallback: nanoseconds since the first read.
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        use std::sync::OnceLock;
        static FALLBACK_EPOCH: OnceLock<Instant> = OnceLock::new();
        let epoch = FALLBACK_EPOCH.get_or_init(Instant::now);
        Instant::now().duration_since(*epoch).as_nanos() as u64
    }
}

/// A counter that only moves when told to.
///
/// Clones share the same counter, so a test can keep one handle and give
/// the other to a [`Session`](crate::Session).
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
    frequency: u64,
}

impl ManualClock {
    /// A clock at cycle 0 ticking `frequency` times per second.
    pub fn new(frequency: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(0)),
            frequency,
        }
    }

    pub fn set(&self, cycles: u64) {
        self.now.set(cycles);
    }

    pub fn advance(&self, cycles: u64) {
        self.now.set(self.now.get() + cycles);
    }

    pub fn now(&self) -> u64 {
        self.now.get()
    }
}

impl CycleSource for ManualClock {
    fn read(&self) -> u64 {
        self.now.get()
    }

    fn nominal_frequency(&self) -> Option<u64> {
        Some(self.frequency)
    }
}

/// Measure how many ticks of `source` elapse per second.
///
/// Sources with a nominal frequency return it without waiting. Otherwise
/// this spins for `wait` against `Instant` and scales the tick delta.
pub fn calibrate<S: CycleSource + ?Sized>(source: &S, wait: Duration) -> Result<u64, Error> {
    if let Some(freq) = source.nominal_frequency() {
        if freq == 0 {
            return Err(Error::CalibrationFailure {
                reason: "cycle source reports a zero frequency".to_owned(),
            });
        }
        return Ok(freq);
    }

    if wait.is_zero() || wait > MAX_CALIBRATION_WAIT {
        return Err(Error::CalibrationFailure {
            reason: format!(
                "calibration wait must be between 1ns and {MAX_CALIBRATION_WAIT:?}, got {wait:?}"
            ),
        });
    }

    let wall_start = Instant::now();
    let tsc_start = source.read();
    while wall_start.elapsed() < wait {}
    let tsc_end = source.read();
    let wall_ns = wall_start.elapsed().as_nanos() as u64;

    let ticks = tsc_end.wrapping_sub(tsc_start);
    tracing::debug!(wall_ns, tsc_start, tsc_end, ticks, "calibration spin finished");

    if ticks == 0 || tsc_end < tsc_start {
        return Err(Error::CalibrationFailure {
            reason: format!("cycle counter did not advance during {wait:?}"),
        });
    }

    // Use u128 to avoid overflow on fast counters.
    let freq = (ticks as u128 * 1_000_000_000 / wall_ns.max(1) as u128) as u64;
    if freq == 0 {
        return Err(Error::CalibrationFailure {
            reason: "estimated frequency rounded to zero".to_owned(),
        });
    }
    tracing::debug!(freq, "cycle frequency estimated");
    Ok(freq)
}

//! Begin/end bookkeeping for one profiling session.
//!
//! Open region invocations live on an explicit LIFO stack of `Frame`s. The
//! top frame is the only one accruing time. `begin` charges the interrupted
//! top frame up to now and pushes a new one; `end` charges the closing
//! frame's last slice and re-arms the frame below it, so every cycle
//! between the first `begin` and the last `end` is charged to exactly one
//! anchor.
//!
//! Recursive re-entry pushes another frame for the same anchor. `end`
//! always closes the topmost frame of that anchor.

use crate::anchor::{cycles_to_ms, Anchor, AnchorId, AnchorTable};
use crate::config::Config;
use crate::error::Error;
use crate::report::Report;
use crate::tsc::{self, CycleSource, Tsc};

/// One open (not yet ended) invocation of an anchor.
#[derive(Debug, Clone, Copy)]
struct Frame {
    anchor: AnchorId,
    /// Cycle at which this frame last started accruing.
    start: u64,
}

/// Profiler state for a single logical thread of control.
///
/// Not meant to be shared across threads; give each thread its own session.
#[derive(Debug)]
pub struct Session<S: CycleSource = Tsc> {
    source: S,
    config: Config,
    table: AnchorTable,
    frames: Vec<Frame>,
    current: Option<AnchorId>,
    total_start: Option<u64>,
    total_cycles: u64,
    frequency: Option<u64>,
}

impl Session<Tsc> {
    /// A hardware-counter session configured from the environment.
    pub fn from_env() -> Self {
        Self::new(Tsc, Config::from_env())
    }
}

impl Default for Session<Tsc> {
    fn default() -> Self {
        Self::new(Tsc, Config::default())
    }
}

impl<S: CycleSource> Session<S> {
    pub fn new(source: S, config: Config) -> Self {
        let table = AnchorTable::new(config.capacity, config.name_max_len);
        Self {
            source,
            config,
            table,
            frames: Vec::new(),
            current: None,
            total_start: None,
            total_cycles: 0,
            frequency: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.switch.is_on()
    }

    /// Start timing `name`.
    pub fn begin(&mut self, name: &str) -> Result<(), Error> {
        self.begin_with_throughput(name, 0)
    }

    /// Start timing `name`, adding `bytes` to its throughput total.
    pub fn begin_with_throughput(&mut self, name: &str, bytes: u64) -> Result<(), Error> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.calibrate()?;

        let id = self.table.lookup_or_create(name, self.current)?;
        {
            let anchor = self.table.get_mut(id);
            anchor.hits += 1;
            anchor.bytes_processed += bytes;
        }
        self.current = Some(id);

        // Clock reading: keep work after this point to a minimum.
        let now = self.source.read();

        if self.total_start.is_none() {
            self.total_start = Some(now);
        }
        if let Some(top) = self.frames.last() {
            let interrupted = self.table.get_mut(top.anchor);
            interrupted.active = false;
            interrupted.exclusive_cycles += now.saturating_sub(top.start);
        }
        self.table.get_mut(id).active = true;
        self.frames.push(Frame {
            anchor: id,
            start: now,
        });
        Ok(())
    }

    /// Stop timing `name`, closing its most recent open invocation.
    ///
    /// Frames opened after that invocation and never ended are closed as
    /// well.
    pub fn end(&mut self, name: &str) -> Result<(), Error> {
        if !self.is_enabled() {
            return Ok(());
        }
        let end = self.source.read();

        let unmatched = || Error::UnmatchedEnd {
            name: name.to_owned(),
        };
        let id = self.table.lookup(name).ok_or_else(unmatched)?;
        let pos = self
            .frames
            .iter()
            .rposition(|f| f.anchor == id)
            .ok_or_else(unmatched)?;

        // Only the top frame is accruing; every frame under it was paused
        // and already charged up to the moment it was interrupted.
        if let Some(top) = self.frames.last() {
            self.table.get_mut(top.anchor).exclusive_cycles += end.saturating_sub(top.start);
        }

        let closed: Vec<Frame> = self.frames.drain(pos..).collect();
        for orphan in &closed[1..] {
            let anchor = self.table.get_mut(orphan.anchor);
            anchor.active = false;
            tracing::warn!(
                orphan = %anchor.name,
                closed_by = name,
                "region was never ended; closing it with its enclosing region"
            );
        }
        self.table.get_mut(closed[0].anchor).active = false;

        if let Some(below) = self.frames.last_mut() {
            below.start = end;
            self.table.get_mut(below.anchor).active = true;
        }
        self.current = self.frames.last().map(|f| f.anchor);

        if let Some(start) = self.total_start {
            self.total_cycles = end.saturating_sub(start);
        }
        Ok(())
    }

    /// Drop all anchors, open frames and totals. The calibrated frequency
    /// is kept.
    pub fn reset(&mut self) {
        self.table.clear();
        self.frames.clear();
        self.current = None;
        self.total_start = None;
        self.total_cycles = 0;
    }

    /// Forget the calibrated frequency; the next `begin` measures it again.
    pub fn recalibrate(&mut self) {
        self.frequency = None;
    }

    /// Calibrate now if not done yet, returning the cycle frequency.
    pub fn calibrate(&mut self) -> Result<u64, Error> {
        if let Some(freq) = self.frequency {
            return Ok(freq);
        }
        let freq = tsc::calibrate(&self.source, self.config.calibration_wait)?;
        self.frequency = Some(freq);
        Ok(freq)
    }

    pub fn frequency(&self) -> Option<u64> {
        self.frequency
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// All anchors in discovery order.
    pub fn anchors(&self) -> &[Anchor] {
        self.table.as_slice()
    }

    /// Look up an anchor by name, truncating it like `begin` does.
    pub fn anchor(&self, name: &str) -> Option<&Anchor> {
        self.table.lookup(name).map(|id| self.table.get(id))
    }

    /// The innermost open region, if any.
    pub fn current_anchor(&self) -> Option<&Anchor> {
        self.current.map(|id| self.table.get(id))
    }

    /// Number of `begin` calls not yet matched by an `end`.
    pub fn open_frames(&self) -> usize {
        self.frames.len()
    }

    /// Cycles from the first `begin` to the most recent `end`.
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn total_elapsed_ms(&self) -> f64 {
        cycles_to_ms(self.total_cycles, self.frequency.unwrap_or(0))
    }

    /// Snapshot of the anchors. `None` when profiling is disabled.
    pub fn report(&self) -> Option<Report> {
        Report::from_session(self)
    }

    /// Print the report to stdout, preceded by a blank line. Does nothing
    /// when profiling is disabled.
    pub fn print_report(&self) {
        if let Some(report) = self.report() {
            let mut out = std::io::stdout().lock();
            if let Err(e) = report.write_to(&mut out) {
                tracing::warn!("failed to print report: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Switch;
    use crate::tsc::ManualClock;

    const FREQ: u64 = 1_000_000;

    fn session() -> (ManualClock, Session<ManualClock>) {
        let clock = ManualClock::new(FREQ);
        let session = Session::new(clock.clone(), Config::default());
        (clock, session)
    }

    #[test]
    fn single_region_charges_its_whole_span() {
        let (clock, mut s) = session();
        s.begin("work").unwrap();
        clock.advance(500);
        s.end("work").unwrap();

        let work = s.anchor("work").unwrap();
        assert_eq!(work.hits(), 1);
        assert_eq!(work.exclusive_cycles(), 500);
        assert_eq!(s.total_cycles(), 500);
        assert_eq!(s.open_frames(), 0);
        assert!(s.current_anchor().is_none());
    }

    #[test]
    fn nested_region_is_excluded_from_parent() {
        let (clock, mut s) = session();
        s.begin("outer").unwrap();
        clock.advance(100);
        s.begin("inner").unwrap();
        clock.advance(40);
        s.end("inner").unwrap();
        clock.advance(10);
        s.end("outer").unwrap();

        assert_eq!(s.anchor("outer").unwrap().exclusive_cycles(), 110);
        assert_eq!(s.anchor("inner").unwrap().exclusive_cycles(), 40);
        assert_eq!(s.total_cycles(), 150);
    }

    #[test]
    fn interrupted_anchor_is_paused_then_resumed() {
        let (clock, mut s) = session();
        s.begin("outer").unwrap();
        s.begin("inner").unwrap();
        assert!(!s.anchor("outer").unwrap().is_active());
        assert!(s.anchor("inner").unwrap().is_active());
        assert_eq!(s.current_anchor().unwrap().name(), "inner");

        clock.advance(5);
        s.end("inner").unwrap();
        assert!(s.anchor("outer").unwrap().is_active());
        assert!(!s.anchor("inner").unwrap().is_active());
        assert_eq!(s.current_anchor().unwrap().name(), "outer");
        assert_eq!(s.open_frames(), 1);
    }

    #[test]
    fn recursion_does_not_double_count() {
        let (clock, mut s) = session();
        s.begin("f").unwrap();
        clock.advance(10);
        s.begin("f").unwrap();
        clock.advance(5);
        s.end("f").unwrap();
        clock.advance(3);
        s.end("f").unwrap();

        let f = s.anchor("f").unwrap();
        assert_eq!(f.hits(), 2);
        assert_eq!(f.exclusive_cycles(), 18);
        assert_eq!(f.depth(), 0);
        assert_eq!(s.total_cycles(), 18);
        assert_eq!(s.anchors().len(), 1);
    }

    #[test]
    fn indirect_recursion_charges_each_slice_once() {
        let (clock, mut s) = session();
        s.begin("a").unwrap(); // 0
        clock.advance(2);
        s.begin("b").unwrap(); // 2
        clock.advance(3);
        s.begin("a").unwrap(); // 5
        clock.advance(4);
        s.end("a").unwrap(); // 9
        clock.advance(1);
        s.end("b").unwrap(); // 10
        clock.advance(6);
        s.end("a").unwrap(); // 16

        assert_eq!(s.anchor("a").unwrap().exclusive_cycles(), 2 + 4 + 6);
        assert_eq!(s.anchor("b").unwrap().exclusive_cycles(), 3 + 1);
        assert_eq!(s.total_cycles(), 16);
    }

    #[test]
    fn depth_is_fixed_at_discovery() {
        let (_clock, mut s) = session();
        s.begin("main").unwrap();
        s.begin("helper").unwrap();
        s.end("helper").unwrap();
        s.end("main").unwrap();

        // Called again from the top level: depth stays 1.
        s.begin("helper").unwrap();
        s.end("helper").unwrap();

        assert_eq!(s.anchor("main").unwrap().depth(), 0);
        assert_eq!(s.anchor("helper").unwrap().depth(), 1);
        assert_eq!(s.anchor("helper").unwrap().hits(), 2);
    }

    #[test]
    fn sibling_discovered_after_end_gets_callers_depth() {
        let (_clock, mut s) = session();
        s.begin("main").unwrap();
        s.begin("first").unwrap();
        s.end("first").unwrap();
        s.begin("second").unwrap();
        s.end("second").unwrap();
        s.end("main").unwrap();

        assert_eq!(s.anchor("second").unwrap().depth(), 1);
        let main = s.table.lookup("main");
        assert_eq!(s.anchor("second").unwrap().parent(), main);
    }

    #[test]
    fn throughput_bytes_accumulate() {
        let (_clock, mut s) = session();
        s.begin_with_throughput("read", 1024).unwrap();
        s.end("read").unwrap();
        s.begin_with_throughput("read", 512).unwrap();
        s.end("read").unwrap();
        s.begin("read").unwrap();
        s.end("read").unwrap();

        let read = s.anchor("read").unwrap();
        assert_eq!(read.bytes_processed(), 1536);
        assert_eq!(read.hits(), 3);
    }

    #[test]
    fn unmatched_end_is_an_error() {
        let (_clock, mut s) = session();
        assert_eq!(
            s.end("missing").unwrap_err(),
            Error::UnmatchedEnd {
                name: "missing".into()
            }
        );

        // Known anchor, but no open frame left.
        s.begin("x").unwrap();
        s.end("x").unwrap();
        assert!(matches!(s.end("x"), Err(Error::UnmatchedEnd { .. })));
        assert_eq!(s.anchor("x").unwrap().hits(), 1);
    }

    #[test]
    fn out_of_order_end_closes_orphans() {
        let (clock, mut s) = session();
        s.begin("outer").unwrap();
        clock.advance(1);
        s.begin("middle").unwrap();
        clock.advance(2);
        s.begin("leaf").unwrap();
        clock.advance(3);
        s.end("middle").unwrap();

        assert_eq!(s.open_frames(), 1);
        assert_eq!(s.anchor("leaf").unwrap().exclusive_cycles(), 3);
        assert_eq!(s.anchor("middle").unwrap().exclusive_cycles(), 2);
        assert_eq!(s.current_anchor().unwrap().name(), "outer");

        clock.advance(4);
        s.end("outer").unwrap();
        assert_eq!(s.anchor("outer").unwrap().exclusive_cycles(), 5);
        assert!(s.end("leaf").is_err());
        assert_eq!(exclusive_sum(&s), s.total_cycles());
    }

    fn exclusive_sum<S: CycleSource>(s: &Session<S>) -> u64 {
        s.anchors().iter().map(Anchor::exclusive_cycles).sum()
    }

    #[test]
    fn out_of_order_end_charges_each_cycle_once() {
        let (clock, mut s) = session();
        s.begin("outer").unwrap();
        s.begin("middle").unwrap();
        clock.advance(10);
        s.begin("leaf").unwrap();
        clock.advance(100);
        s.end("middle").unwrap();
        s.end("outer").unwrap();

        assert_eq!(s.anchor("middle").unwrap().exclusive_cycles(), 10);
        assert_eq!(s.anchor("leaf").unwrap().exclusive_cycles(), 100);
        assert_eq!(s.total_cycles(), 110);
        assert_eq!(exclusive_sum(&s), 110);
    }

    #[test]
    fn out_of_order_end_with_several_orphans() {
        let (clock, mut s) = session();
        s.begin("outer").unwrap();
        clock.advance(1);
        s.begin("middle").unwrap();
        clock.advance(2);
        s.begin("leaf1").unwrap();
        clock.advance(3);
        s.begin("leaf2").unwrap();
        clock.advance(4);
        s.end("middle").unwrap();

        assert_eq!(s.open_frames(), 1);
        assert!(!s.anchor("leaf1").unwrap().is_active());
        assert!(!s.anchor("leaf2").unwrap().is_active());
        assert!(s.anchor("outer").unwrap().is_active());

        clock.advance(5);
        s.end("outer").unwrap();
        let cycles: Vec<u64> = s.anchors().iter().map(Anchor::exclusive_cycles).collect();
        assert_eq!(cycles, [6, 2, 3, 4]);
        assert_eq!(exclusive_sum(&s), s.total_cycles());
        assert_eq!(s.total_cycles(), 15);
    }

    #[test]
    fn capacity_overflow_leaves_state_intact() {
        let clock = ManualClock::new(FREQ);
        let mut s = Session::new(clock.clone(), Config::default().with_capacity(2));
        s.begin("a").unwrap();
        s.begin("b").unwrap();
        clock.advance(7);

        let err = s.begin("c").unwrap_err();
        assert!(matches!(err, Error::AnchorCapacityExceeded { capacity: 2, .. }));
        assert_eq!(s.open_frames(), 2);
        assert_eq!(s.current_anchor().unwrap().name(), "b");

        s.end("b").unwrap();
        s.end("a").unwrap();
        assert_eq!(s.anchor("b").unwrap().exclusive_cycles(), 7);
        assert_eq!(s.anchors().len(), 2);
    }

    #[test]
    fn disabled_session_records_nothing() {
        let clock = ManualClock::new(FREQ);
        let mut s = Session::new(clock.clone(), Config::default().with_switch(Switch::Off));
        s.begin("a").unwrap();
        clock.advance(10);
        s.end("a").unwrap();
        s.end("never-begun").unwrap();

        assert!(s.anchors().is_empty());
        assert_eq!(s.total_cycles(), 0);
        assert_eq!(s.frequency(), None);
    }

    #[test]
    fn reset_keeps_calibration() {
        let (clock, mut s) = session();
        s.begin("a").unwrap();
        clock.advance(10);
        s.end("a").unwrap();
        assert_eq!(s.frequency(), Some(FREQ));

        s.reset();
        assert!(s.anchors().is_empty());
        assert_eq!(s.open_frames(), 0);
        assert_eq!(s.total_cycles(), 0);
        assert_eq!(s.frequency(), Some(FREQ));

        // The total span restarts at the next begin.
        s.begin("b").unwrap();
        clock.advance(4);
        s.end("b").unwrap();
        assert_eq!(s.total_cycles(), 4);
        assert_eq!(s.anchor("b").unwrap().depth(), 0);
    }

    #[test]
    fn recalibrate_clears_frequency() {
        let (_clock, mut s) = session();
        s.calibrate().unwrap();
        s.recalibrate();
        assert_eq!(s.frequency(), None);
        s.begin("x").unwrap();
        assert_eq!(s.frequency(), Some(FREQ));
    }

    #[test]
    fn failed_calibration_fails_closed() {
        let clock = ManualClock::new(0);
        let mut s = Session::new(clock, Config::default());
        assert!(matches!(
            s.begin("a"),
            Err(Error::CalibrationFailure { .. })
        ));
        assert!(s.anchors().is_empty());
        assert_eq!(s.open_frames(), 0);
    }

    #[test]
    fn total_span_covers_top_level_regions() {
        let (clock, mut s) = session();
        clock.set(1_000);
        s.begin("first").unwrap();
        clock.advance(10);
        s.end("first").unwrap();
        clock.advance(50);
        s.begin("second").unwrap();
        clock.advance(20);
        s.end("second").unwrap();

        assert_eq!(s.total_cycles(), 80);
        let sum: u64 = s.anchors().iter().map(Anchor::exclusive_cycles).sum();
        assert!(sum <= s.total_cycles());
        assert!((s.total_elapsed_ms() - 0.08).abs() < 1e-9);
    }
}

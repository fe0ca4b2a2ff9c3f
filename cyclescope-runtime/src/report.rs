//! Flat, depth-indented text report of a session.
//!
//! ```text
//!              total:    152.310ms (CPU freq: 2995200000)
//!         total-work:     12.004ms ( 7.88%) -- calls: 1
//!                parse:    140.306ms (92.12%) -- calls: 1,    1.00MB at 0.007GB/s
//! ```

use std::fmt;
use std::io::Write;

use crate::anchor::cycles_to_ms;
use crate::session::Session;
use crate::tsc::CycleSource;

/// Name printed for the whole-run line.
pub const TOTAL_NAME: &str = "total";

const MEGABYTE: f64 = 1024.0 * 1024.0;
const GIGABYTE: f64 = 1024.0 * 1024.0 * 1024.0;

/// Snapshot of a session's anchors, ready to print.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Report {
    pub frequency: u64,
    pub total: TotalRow,
    pub rows: Vec<Row>,
    /// Width names are right-aligned to.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub name_width: usize,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TotalRow {
    pub cycles: u64,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Row {
    pub name: String,
    pub depth: u32,
    pub hits: u64,
    pub exclusive_cycles: u64,
    pub elapsed_ms: f64,
    /// Share of the total span; `None` while the total is zero.
    pub percent: Option<f64>,
    pub throughput: Option<Throughput>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Throughput {
    pub bytes: u64,
    pub megabytes: f64,
    pub gigabytes_per_sec: f64,
}

impl Report {
    /// Build the report for the current state of `session`. `None` when
    /// profiling is disabled.
    pub fn from_session<S: CycleSource>(session: &Session<S>) -> Option<Report> {
        if !session.is_enabled() {
            return None;
        }
        let frequency = session.frequency().unwrap_or(0);
        let total_cycles = session.total_cycles();

        let rows = session
            .anchors()
            .iter()
            .map(|anchor| {
                let cycles = anchor.exclusive_cycles();
                let percent =
                    (total_cycles > 0).then(|| 100.0 * cycles as f64 / total_cycles as f64);
                let throughput = (anchor.bytes_processed() > 0).then(|| {
                    let bytes = anchor.bytes_processed();
                    let seconds = if frequency == 0 {
                        0.0
                    } else {
                        cycles as f64 / frequency as f64
                    };
                    let gigabytes_per_sec = if seconds > 0.0 {
                        bytes as f64 / GIGABYTE / seconds
                    } else {
                        0.0
                    };
                    Throughput {
                        bytes,
                        megabytes: bytes as f64 / MEGABYTE,
                        gigabytes_per_sec,
                    }
                });
                Row {
                    name: anchor.name().to_owned(),
                    depth: anchor.depth(),
                    hits: anchor.hits(),
                    exclusive_cycles: cycles,
                    elapsed_ms: anchor.elapsed_ms(frequency),
                    percent,
                    throughput,
                }
            })
            .collect();

        Some(Report {
            frequency,
            total: TotalRow {
                cycles: total_cycles,
                elapsed_ms: cycles_to_ms(total_cycles, frequency),
            },
            rows,
            name_width: session.config().name_max_len,
        })
    }

    /// Write the report to `out`, preceded by a blank line.
    pub fn write_to(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out)?;
        write!(out, "{self}")
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.name_width;
        writeln!(
            f,
            "{:>width$}: {:10.3}ms (CPU freq: {})",
            TOTAL_NAME, self.total.elapsed_ms, self.frequency
        )?;
        for row in &self.rows {
            let indent = row.depth as usize * 2;
            write!(
                f,
                "{:indent$}{:>width$}: {:10.3}ms ({:5.2}%) -- calls: {}",
                "",
                row.name,
                row.elapsed_ms,
                row.percent.unwrap_or(0.0),
                row.hits
            )?;
            if let Some(tp) = &row.throughput {
                write!(
                    f,
                    ", {:7.2}MB at {:5.3}GB/s",
                    tp.megabytes, tp.gigabytes_per_sec
                )?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

//! Built-in instrumented workload used by `cyclescope demo`.
//!
//! Exercises every shape the profiler distinguishes: nested regions,
//! throughput-tracked regions, a region re-entered from two call sites and
//! direct self-recursion.

use cyclescope_runtime::{CycleSource, Session};

use crate::error::Error;

/// Deepest Fibonacci recursion accepted; the call count grows as fib(n).
pub const MAX_DEPTH: u32 = 32;

#[derive(Debug, Clone)]
pub struct Workload {
    /// Size of the buffer filled and checksummed each pass.
    pub bytes: usize,
    /// Fibonacci argument for the recursive region.
    pub depth: u32,
    pub passes: u32,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            bytes: 1024 * 1024,
            depth: 16,
            passes: 4,
        }
    }
}

impl Workload {
    pub fn validate(&self) -> Result<(), Error> {
        if self.bytes == 0 {
            return Err(Error::InvalidWorkload("buffer size must be non-zero".into()));
        }
        if self.depth > MAX_DEPTH {
            return Err(Error::InvalidWorkload(format!(
                "recursion depth {} exceeds {MAX_DEPTH}",
                self.depth
            )));
        }
        if self.passes == 0 {
            return Err(Error::InvalidWorkload("at least one pass is required".into()));
        }
        Ok(())
    }

    /// Run every pass under `session`, returning a checksum of the work.
    pub fn run<S: CycleSource>(&self, session: &mut Session<S>) -> Result<u64, Error> {
        self.validate()?;
        let mut buf = vec![0u8; self.bytes];
        let mut acc = 0u64;

        session.begin("demo")?;
        for pass in 0..self.passes {
            session.begin("pass")?;

            session.begin_with_throughput("fill", self.bytes as u64)?;
            fill(&mut buf, pass);
            session.end("fill")?;

            acc = acc.wrapping_add(checksum(session, &buf)?);

            session.begin("parse")?;
            let text = render_numbers(&buf[..buf.len().min(4096)]);
            acc = acc.wrapping_add(parse_numbers(session, &text)?);
            session.end("parse")?;

            acc = acc.wrapping_add(fib(session, self.depth)?);
            session.end("pass")?;
        }
        // Second call site for an already-known region.
        acc = acc.wrapping_add(checksum(session, &buf)?);
        session.end("demo")?;

        Ok(std::hint::black_box(acc))
    }
}

fn fill(buf: &mut [u8], seed: u32) {
    let mut x = seed as u8;
    for b in buf.iter_mut() {
        x = x.wrapping_mul(31).wrapping_add(7);
        *b = x;
    }
}

fn checksum<S: CycleSource>(session: &mut Session<S>, buf: &[u8]) -> Result<u64, Error> {
    session.begin_with_throughput("checksum", buf.len() as u64)?;
    let sum = buf
        .iter()
        .fold(0u64, |acc, &b| acc.rotate_left(5) ^ u64::from(b));
    session.end("checksum")?;
    Ok(sum)
}

fn render_numbers(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for b in bytes {
        out.push_str(&b.to_string());
        out.push(' ');
    }
    out
}

fn parse_numbers<S: CycleSource>(session: &mut Session<S>, text: &str) -> Result<u64, Error> {
    session.begin_with_throughput("tokenize", text.len() as u64)?;
    let tokens: Vec<&str> = text.split_ascii_whitespace().collect();
    session.end("tokenize")?;

    let mut sum = 0u64;
    for token in tokens {
        sum += token.parse::<u64>().unwrap_or(0);
    }
    Ok(sum)
}

fn fib<S: CycleSource>(session: &mut Session<S>, n: u32) -> Result<u64, Error> {
    session.begin("fib")?;
    let value = if n < 2 {
        u64::from(n)
    } else {
        fib(session, n - 1)? + fib(session, n - 2)?
    };
    session.end("fib")?;
    Ok(value)
}

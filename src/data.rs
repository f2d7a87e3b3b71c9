//! Core data model: 64-bit blocks, group-annotated recordings, and the
//! bit stream that generators draw from.
//!
//! Everything the engine generates flows through a [`BitStream`]: a source
//! of 64-bit words ("blocks") that is either *generative* (blocks come from
//! a seeded ChaCha8 PRNG) or *replaying* (blocks come from a previously
//! recorded buffer). As a stream is consumed it builds a [`RecordedBits`]
//! trace: the ordered buffer of drawn blocks plus [`Group`] annotations
//! marking which spans of the buffer belong to which generator. The shrinker
//! operates purely on this trace, which is what lets one reducer shrink
//! values of any type.

use std::cmp::Ordering;
use std::fmt;
use std::panic::{panic_any, Location};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::engine::Config;
use crate::generator::Gen;

/// Handle returned by [`BitStream::begin_group`] on a non-recording stream.
const NO_GROUP: usize = usize::MAX;

/// A labelled half-open index range `[begin, end)` into a recorded buffer.
///
/// Groups mark the span of blocks one generator consumed. `removable`
/// groups (collection elements) may be deleted wholesale by the shrinker;
/// structural groups only have their blocks minimized in place. `end` is
/// `None` while the group is still open, or when the stream was dropped
/// before the group closed; [`RecordedBits::prune`] resolves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub label: &'static str,
    pub begin: usize,
    pub end: Option<usize>,
    pub removable: bool,
}

/// The trace of one run: every drawn block, in draw order, plus the group
/// annotations. Outlives the stream that produced it.
#[derive(Debug, Clone, Default)]
pub struct RecordedBits {
    pub data: Vec<u64>,
    pub groups: Vec<Group>,
}

impl RecordedBits {
    /// Normalizes the group list: open-ended groups are closed at the end of
    /// the buffer and empty groups are dropped. Insertion order is kept.
    /// Duplicate adjacent groups with identical spans may remain; the
    /// shrinker uses them to coalesce attempts on equivalent spans.
    pub fn prune(&mut self) {
        let len = self.data.len();
        for g in &mut self.groups {
            if g.end.is_none() {
                g.end = Some(len);
            }
        }
        self.groups.retain(|g| Some(g.begin) != g.end);
    }
}

/// Orders buffers by length, then lexicographically over blocks. A strictly
/// smaller buffer is a simpler test case; this is the shrinker's sole
/// progress measure.
pub fn compare_data(a: &[u64], b: &[u64]) -> Ordering {
    match a.len().cmp(&b.len()) {
        Ordering::Equal => a.cmp(b),
        ord => ord,
    }
}

enum Mode {
    Random(ChaCha8Rng),
    Replay { buf: Vec<u64>, pos: usize },
}

/// Source of 64-bit blocks, either generative or replaying a buffer.
///
/// The stream is reset per invocation; no PRNG state crosses runs. Replaying
/// a buffer through the same generator reproduces the same typed value.
pub struct BitStream {
    mode: Mode,
    rec: RecordedBits,
    recording: bool,
}

impl BitStream {
    /// Generative stream over a seeded PRNG. Always records.
    pub fn random(seed: u64) -> BitStream {
        BitStream {
            mode: Mode::Random(ChaCha8Rng::seed_from_u64(seed)),
            rec: RecordedBits::default(),
            recording: true,
        }
    }

    /// Replay stream over a fixed buffer. Recording is optional: the
    /// shrinker's first validation replay skips it.
    pub fn replay(buf: Vec<u64>, recording: bool) -> BitStream {
        BitStream {
            mode: Mode::Replay { buf, pos: 0 },
            rec: RecordedBits::default(),
            recording,
        }
    }

    /// Draws the next block and returns its low `n` bits, `1 <= n <= 64`.
    /// The masked value is what gets recorded, so a recording replayed from
    /// a buffer never compares greater than that buffer. Exhausting the
    /// buffer in replay mode aborts the run with an out-of-data rejection.
    pub fn draw_bits(&mut self, n: u32) -> u64 {
        assert!((1..=64).contains(&n), "draw_bits: width {} out of 1..=64", n);
        let raw = self.next_block();
        let v = if n == 64 { raw } else { raw & ((1u64 << n) - 1) };
        if self.recording {
            self.rec.data.push(v);
        }
        v
    }

    /// Emits a forced control block. Generative mode records the literal
    /// `v` without consuming entropy; replay mode consumes one block and
    /// records it, ignoring its value. Keeps element spans block-aligned
    /// when the repeat protocol makes a decision that is not up to chance.
    pub fn write(&mut self, v: u64) {
        let out = if matches!(self.mode, Mode::Replay { .. }) {
            self.next_block()
        } else {
            v
        };
        if self.recording {
            self.rec.data.push(out);
        }
    }

    fn next_block(&mut self) -> u64 {
        match &mut self.mode {
            Mode::Random(rng) => rng.next_u64(),
            Mode::Replay { buf, pos } => {
                if *pos >= buf.len() {
                    panic_any(OutOfData);
                }
                let v = buf[*pos];
                *pos += 1;
                v
            }
        }
    }

    /// Opens a group at the current buffer position. The returned handle is
    /// passed back to [`end_group`](BitStream::end_group); groups close in
    /// LIFO order within a run.
    pub fn begin_group(&mut self, label: &'static str, removable: bool) -> usize {
        if !self.recording {
            return NO_GROUP;
        }
        self.rec.groups.push(Group {
            label,
            begin: self.rec.data.len(),
            end: None,
            removable,
        });
        self.rec.groups.len() - 1
    }

    pub fn end_group(&mut self, handle: usize) {
        if !self.recording {
            return;
        }
        self.rec.groups[handle].end = Some(self.rec.data.len());
    }

    /// Snapshot of the trace so far.
    pub fn recorded(&self) -> RecordedBits {
        self.rec.clone()
    }

    pub(crate) fn into_recorded(self) -> RecordedBits {
        self.rec
    }
}

/// Panic payload: the property rejected this test case (failed assumption,
/// exhausted filter, or an unsatisfiable distinctness budget). Counted
/// against the discard budget, never surfaced as a failure.
pub(crate) struct Invalid {
    pub reason: String,
}

impl Invalid {
    pub fn new(reason: impl Into<String>) -> Invalid {
        Invalid { reason: reason.into() }
    }
}

/// Panic payload: a replay consumed more blocks than the buffer holds.
/// Shrink candidates that starve the generator are rejected this way.
pub(crate) struct OutOfData;

/// Panic payload: the property called [`T::fatal`].
pub(crate) struct Failed {
    pub message: String,
    pub location: &'static Location<'static>,
}

/// Captured property failure: the message plus an opaque trace fingerprint.
/// Two failures are the same failure iff both fields match; the shrinker
/// compares fingerprints to make sure a smaller buffer reproduces the
/// original bug rather than uncovering a different one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicError {
    pub message: String,
    pub trace: String,
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Per-run context threaded through a property. Owns the active stream and
/// counts draws and assumptions; lives for exactly one property invocation.
pub struct T {
    pub(crate) s: BitStream,
    name: String,
    pub(crate) cfg: Config,
    draws: u32,
    assumes: u32,
}

impl T {
    pub(crate) fn new(name: &str, s: BitStream, cfg: &Config) -> T {
        T {
            s,
            name: name.to_string(),
            cfg: cfg.clone(),
            draws: 0,
            assumes: 0,
        }
    }

    /// Draws a value from `g` inside a group labelled with the generator's
    /// kind. `name` only shows up in debug logs.
    pub fn draw<G: Gen>(&mut self, g: &G, name: &str) -> G::Value {
        let v = g.value(self);
        self.draws += 1;
        if self.cfg.debug {
            log::debug!("[{}] {} := {:?}", self.name, name, v);
        }
        v
    }

    /// Low-level draw for custom leaf generators: the low `n` bits of the
    /// next block, recorded without any extra grouping.
    pub fn bits(&mut self, n: u32) -> u64 {
        self.s.draw_bits(n)
    }

    /// The underlying stream, for composite generators that speak the
    /// repeat protocol directly.
    pub fn stream(&mut self) -> &mut BitStream {
        &mut self.s
    }

    /// Rejects the current test case unless `cond` holds. Rejected cases
    /// are redrawn and counted against the discard budget.
    pub fn assume(&mut self, cond: bool) {
        self.assumes += 1;
        if !cond {
            panic_any(Invalid::new("assumption violated"));
        }
    }

    /// Fails the property with `msg`, terminating the current run. The
    /// recording stays valid; the call site becomes part of the failure's
    /// trace fingerprint.
    #[track_caller]
    pub fn fatal(&mut self, msg: impl fmt::Display) -> ! {
        panic_any(Failed {
            message: msg.to_string(),
            location: Location::caller(),
        })
    }

    /// Logs through the `log` facade, tagged with the check's name.
    pub fn log(&self, msg: impl fmt::Display) {
        log::info!("[{}] {}", self.name, msg);
    }

    pub fn draws(&self) -> u32 {
        self.draws
    }

    pub fn assumes(&self) -> u32 {
        self.assumes
    }

    pub(crate) fn into_recorded(self) -> RecordedBits {
        self.s.into_recorded()
    }
}

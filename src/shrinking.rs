//! Buffer shrinking: reduces a failing test case to a locally minimal one.
//!
//! The shrinker never looks at typed values. It works on the recorded
//! block buffer, alternating two transformations until neither makes the
//! buffer smaller in the length-then-lexicographic order: deleting
//! removable groups (which removes collection elements together with
//! their control blocks) and minimizing individual blocks (which walks
//! each value toward its simplest encoding). Every candidate buffer is
//! validated by replaying the property and comparing failure
//! fingerprints, so a candidate that fails differently, or not at all,
//! is rejected rather than adopted.

use std::cmp::Ordering;
use std::fmt;
use std::time::Instant;

use crate::data::{compare_data, BitStream, PanicError, RecordedBits, T};
use crate::engine::{check_once, Config, Verdict};
use crate::vis;

/// Result of a shrink run. `Flaky` means a candidate buffer produced
/// different outcomes across two back-to-back replays; shrinking cannot
/// trust anything it observed after that, so it stops and reports both.
pub(crate) enum Shrunk {
    Minimized {
        buffer: Vec<u64>,
        error: PanicError,
    },
    Flaky {
        buffer: Vec<u64>,
        expected: PanicError,
        got: Option<PanicError>,
    },
}

pub(crate) struct Shrinker<'a, P> {
    cfg: &'a Config,
    name: &'a str,
    rec: RecordedBits,
    err: PanicError,
    prop: &'a P,
    tries: u32,
    flaky: Option<(PanicError, Option<PanicError>)>,
    vis_steps: Vec<RecordedBits>,
}

impl<'a, P: Fn(&mut T)> Shrinker<'a, P> {
    pub fn new(
        cfg: &'a Config,
        name: &'a str,
        mut rec: RecordedBits,
        err: PanicError,
        prop: &'a P,
    ) -> Shrinker<'a, P> {
        rec.prune();
        Shrinker {
            cfg,
            name,
            rec,
            err,
            prop,
            tries: 0,
            flaky: None,
            vis_steps: Vec::new(),
        }
    }

    pub fn shrink(mut self) -> Shrunk {
        let start = Instant::now();
        let mut rounds = 0u32;
        let mut shrunk = true;
        while shrunk && start.elapsed() < self.cfg.shrink_time_limit && self.flaky.is_none() {
            let data = self.rec.data.clone();

            self.debugf(format_args!("round {} start, {} blocks", rounds, data.len()));
            self.remove_block_groups();
            self.minimize_blocks();

            shrunk = compare_data(&self.rec.data, &data) == Ordering::Less;
            rounds += 1;
        }
        self.debugf(format_args!(
            "done, {} rounds total ({} tries), {} blocks left",
            rounds,
            self.tries,
            self.rec.data.len()
        ));

        if self.cfg.debugvis {
            if let Err(e) = vis::write_html(self.name, &self.vis_steps) {
                log::warn!("[{}] failed to write debugvis file: {}", self.name, e);
            }
        }

        match self.flaky {
            Some((expected, got)) => Shrunk::Flaky {
                buffer: self.rec.data,
                expected,
                got,
            },
            None => Shrunk::Minimized {
                buffer: self.rec.data,
                error: self.err,
            },
        }
    }

    /// Walks groups in recorded order, attempting to delete each removable
    /// span. On acceptance the recording (and its group list) has been
    /// replaced, so the walk continues from the same index; on rejection
    /// any immediately following duplicates of the same span are skipped.
    fn remove_block_groups(&mut self) {
        let mut i = 0;
        while i < self.rec.groups.len() {
            if self.flaky.is_some() {
                return;
            }
            let g = self.rec.groups[i].clone();
            if !g.removable {
                self.debugf(format_args!(
                    "skip non-removable group {:?} at {}: [{}, {:?})",
                    g.label, i, g.begin, g.end
                ));
                i += 1;
                continue;
            }

            let mut buf = self.rec.data.clone();
            let end = g.end.unwrap_or(buf.len());
            buf.drain(g.begin..end);
            let accepted = self.accept(
                &buf,
                format_args!("remove group {:?} at {}: [{}, {})", g.label, i, g.begin, end),
            );
            if !accepted {
                i += 1;
                while i < self.rec.groups.len()
                    && self.rec.groups[i].begin == g.begin
                    && self.rec.groups[i].end == g.end
                {
                    self.debugf(format_args!(
                        "skip duplicate group {}: [{}, {:?})",
                        i, g.begin, g.end
                    ));
                    i += 1;
                }
            }
        }
    }

    /// Runs the block minimizer over every buffer index, with full
    /// property replays as the acceptance predicate.
    fn minimize_blocks(&mut self) {
        let mut i = 0;
        while i < self.rec.data.len() {
            if self.flaky.is_some() {
                return;
            }
            let u = self.rec.data[i];
            let small = self.cfg.small;
            minimize(u, small, |v| {
                // an earlier acceptance may have truncated the buffer
                if i >= self.rec.data.len() {
                    return false;
                }
                let mut buf = self.rec.data.clone();
                buf[i] = v;
                self.accept(&buf, format_args!("minimize block {}: {} to {}", i, u, v))
            });
            i += 1;
        }
    }

    /// Validates a candidate buffer. Accepted candidates replace the
    /// current recording; the second, recording replay guards against
    /// nondeterministic properties.
    fn accept(&mut self, buf: &[u64], desc: fmt::Arguments<'_>) -> bool {
        if self.flaky.is_some() {
            return false;
        }
        if compare_data(buf, &self.rec.data) != Ordering::Less {
            return false;
        }

        self.tries += 1;
        self.debugf(desc);

        let mut t1 = T::new(self.name, BitStream::replay(buf.to_vec(), false), self.cfg);
        let err1 = match check_once(&mut t1, self.prop) {
            Verdict::Fail(e) if e.trace == self.err.trace => e,
            _ => return false,
        };

        self.err = err1.clone();
        let mut t2 = T::new(self.name, BitStream::replay(buf.to_vec(), true), self.cfg);
        let verdict2 = check_once(&mut t2, self.prop);
        let mut rec = t2.into_recorded();
        rec.prune();
        // replay may consume fewer blocks than supplied, or record masked
        // values; either way the recording never compares greater
        assert!(compare_data(&rec.data, buf) != Ordering::Greater);
        self.rec = rec;
        if self.cfg.debugvis {
            self.vis_steps.push(self.rec.clone());
        }

        match verdict2 {
            Verdict::Fail(e2) if e2 == err1 => {}
            Verdict::Fail(e2) => self.flaky = Some((err1, Some(e2))),
            _ => self.flaky = Some((err1, None)),
        }
        true
    }

    fn debugf(&self, args: fmt::Arguments<'_>) {
        if self.cfg.debug {
            log::debug!("[{}] [shrink] {}", self.name, args);
        }
    }
}

/// Finds the smallest `v <= u` accepted by `cond`, or `u` if none is.
///
/// Values below `small` are swept directly; beyond that a fixed schedule
/// of bit-level moves runs once, each phase only ever replacing the best
/// candidate with a strictly smaller accepted one: halving, clearing
/// single bits, bubbling set bits toward the low end, and a final binary
/// search. Every phase makes monotonic progress in the same
/// length-then-lexicographic order the shrinker uses for whole buffers.
pub(crate) fn minimize(u: u64, small: u64, mut cond: impl FnMut(u64) -> bool) -> u64 {
    if u == 0 {
        return 0;
    }
    let mut i = 0;
    while i < u && i < small {
        if cond(i) {
            return i;
        }
        i += 1;
    }
    if u <= small {
        return u;
    }

    let mut m = Minimizer { best: u, cond: &mut cond };

    m.shift_right();
    m.unset_bits();
    m.sort_bits();
    m.bin_search();

    m.best
}

struct Minimizer<'a, F> {
    best: u64,
    cond: &'a mut F,
}

impl<F: FnMut(u64) -> bool> Minimizer<'_, F> {
    fn accept(&mut self, v: u64) -> bool {
        if v >= self.best || !(self.cond)(v) {
            return false;
        }
        self.best = v;
        true
    }

    fn shift_right(&mut self) {
        while self.accept(self.best >> 1) {}
    }

    fn unset_bits(&mut self) {
        let size = 64 - self.best.leading_zeros();
        for i in 0..size {
            self.accept(self.best ^ (1 << i));
        }
    }

    fn sort_bits(&mut self) {
        let size = 64 - self.best.leading_zeros();
        for i in 0..size {
            for j in 0..size.saturating_sub(i + 1) {
                let l = 1u64 << j;
                let h = 1u64 << (j + 1);
                if self.best & l == 0 && self.best & h != 0 {
                    self.accept(self.best ^ (l | h));
                }
            }
        }
    }

    fn bin_search(&mut self) {
        if self.best == 0 || !self.accept(self.best - 1) {
            return;
        }

        let mut i = 0;
        let mut j = self.best;
        while i < j {
            let h = i + (j - i) / 2;
            if self.accept(h) {
                j = h;
            } else {
                i = h + 1;
            }
        }
    }
}

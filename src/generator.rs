//! The generator seam: how typed values are produced from the bit stream.
//!
//! A generator is anything that can turn draws from a [`T`] into a value.
//! Leaf generators consume blocks directly; composite generators delegate
//! to inner generators, opening one group per logical component so the
//! shrinker can see the value's structure in the recording.

use std::fmt;
use std::panic::panic_any;

use crate::data::{Invalid, T};

/// A source of typed values drawn from the bit stream.
///
/// Implementations draw through the [`T`] passed to [`generate`]
/// (`Gen::generate`) and must be deterministic functions of those draws:
/// replaying the same blocks yields the same value. That contract is what
/// allows the engine to validate shrink candidates by replay.
pub trait Gen {
    type Value: fmt::Debug;

    /// Produces one value. Called inside a group labelled with
    /// [`label`](Gen::label); composite implementations open further
    /// groups per element.
    fn generate(&self, t: &mut T) -> Self::Value;

    /// Short kind label used for group annotations and debug logs.
    fn label(&self) -> &'static str;

    /// Draws one value wrapped in this generator's structural group.
    fn value(&self, t: &mut T) -> Self::Value
    where
        Self: Sized,
    {
        let g = t.s.begin_group(self.label(), false);
        let v = self.generate(t);
        t.s.end_group(g);
        v
    }

    /// Maps produced values through `f`.
    fn map<U: fmt::Debug, F: Fn(Self::Value) -> U>(self, f: F) -> Map<Self, F>
    where
        Self: Sized,
    {
        Map { inner: self, f }
    }

    /// Keeps only values satisfying `pred`, redrawing on mismatch. Runs
    /// out of patience after a configurable number of tries and rejects
    /// the whole test case, which counts against the discard budget.
    fn filter<F: Fn(&Self::Value) -> bool>(self, pred: F) -> Filter<Self, F>
    where
        Self: Sized,
    {
        Filter { inner: self, pred }
    }
}

/// A generator defined by a closure over `T`. The building block for
/// user-defined combinators: compose existing generators with `t.draw`
/// and ordinary control flow.
pub struct Custom<F> {
    f: F,
}

pub fn from_fn<V: fmt::Debug, F: Fn(&mut T) -> V>(f: F) -> Custom<F> {
    Custom { f }
}

impl<V: fmt::Debug, F: Fn(&mut T) -> V> Gen for Custom<F> {
    type Value = V;

    fn generate(&self, t: &mut T) -> V {
        (self.f)(t)
    }

    fn label(&self) -> &'static str {
        "custom"
    }
}

pub struct Map<G, F> {
    inner: G,
    f: F,
}

impl<G: Gen, U: fmt::Debug, F: Fn(G::Value) -> U> Gen for Map<G, F> {
    type Value = U;

    fn generate(&self, t: &mut T) -> U {
        (self.f)(self.inner.value(t))
    }

    fn label(&self) -> &'static str {
        "map"
    }
}

pub struct Filter<G, F> {
    inner: G,
    pred: F,
}

impl<G: Gen, F: Fn(&G::Value) -> bool> Gen for Filter<G, F> {
    type Value = G::Value;

    fn generate(&self, t: &mut T) -> G::Value {
        let tries = t.cfg.filter_tries;
        for _ in 0..tries {
            let v = self.inner.value(t);
            if (self.pred)(&v) {
                return v;
            }
        }
        panic_any(Invalid::new("filter: could not satisfy predicate"))
    }

    fn label(&self) -> &'static str {
        "filter"
    }
}

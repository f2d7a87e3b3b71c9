//! Composite generators: slices, arrays, distinct slices, and maps.
//!
//! All variable-length collections speak the repeat protocol from
//! [`crate::distributions`]: one removable group per potential element,
//! holding the continue/stop control block and the element's own draws.
//! The shrinker removes elements by deleting those groups; the generators
//! here only have to keep their layout honest.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::panic::panic_any;

use crate::data::{Invalid, T};
use crate::distributions::Repeat;
use crate::generator::Gen;

const DEFAULT_MAX_LEN: usize = 32;

fn expected_len(min: usize, max: usize) -> f64 {
    (min as f64 + 4.0).min(max as f64)
}

/// `Vec` of values from `elem`, length in `[min, max]`.
pub struct SlicesOf<G> {
    elem: G,
    min: usize,
    max: usize,
}

pub fn slices_of<G: Gen>(elem: G) -> SlicesOf<G> {
    slices_of_n(elem, 0, DEFAULT_MAX_LEN)
}

pub fn slices_of_n<G: Gen>(elem: G, min: usize, max: usize) -> SlicesOf<G> {
    assert!(min <= max, "slices_of_n: empty length range [{}, {}]", min, max);
    SlicesOf { elem, min, max }
}

impl<G: Gen> Gen for SlicesOf<G> {
    type Value = Vec<G::Value>;

    fn generate(&self, t: &mut T) -> Vec<G::Value> {
        let mut rep = Repeat::new(self.min, self.max, expected_len(self.min, self.max));
        let mut out = Vec::new();
        while rep.more(&mut t.s, "slice elem") {
            out.push(self.elem.value(t));
        }
        out
    }

    fn label(&self) -> &'static str {
        "slice"
    }
}

/// `Vec` of exactly `len` values. No control blocks are drawn; the layout
/// is `len` removable element groups back to back, so the shrinker can
/// minimize inside an element but any candidate that changes the block
/// count shifts every later element and gets rejected on replay.
pub struct ArraysOf<G> {
    elem: G,
    len: usize,
}

pub fn arrays_of<G: Gen>(len: usize, elem: G) -> ArraysOf<G> {
    ArraysOf { elem, len }
}

impl<G: Gen> Gen for ArraysOf<G> {
    type Value = Vec<G::Value>;

    fn generate(&self, t: &mut T) -> Vec<G::Value> {
        let mut rep = Repeat::new(self.len, self.len, self.len as f64);
        let mut out = Vec::with_capacity(self.len);
        while rep.more(&mut t.s, "array elem") {
            out.push(self.elem.value(t));
        }
        out
    }

    fn label(&self) -> &'static str {
        "array"
    }
}

/// `Vec` with no two elements sharing a key, length in `[min, max]`.
///
/// A drawn element whose key collides is rejected in place: its blocks
/// stay inside the current removable group and the element is not
/// counted. Rejections are capped at `distinct_tries_factor * max`; once
/// the cap is hit the collection closes early, and a close below `min`
/// rejects the whole test case.
pub struct SlicesOfDistinct<G, F> {
    elem: G,
    min: usize,
    max: usize,
    key: F,
}

pub fn slices_of_distinct<G: Gen>(
    elem: G,
) -> SlicesOfDistinct<G, impl Fn(&G::Value) -> G::Value>
where
    G::Value: Hash + Eq + Clone,
{
    slices_of_n_distinct(elem, 0, DEFAULT_MAX_LEN)
}

pub fn slices_of_n_distinct<G: Gen>(
    elem: G,
    min: usize,
    max: usize,
) -> SlicesOfDistinct<G, impl Fn(&G::Value) -> G::Value>
where
    G::Value: Hash + Eq + Clone,
{
    slices_of_n_distinct_by(elem, min, max, |v: &G::Value| v.clone())
}

pub fn slices_of_distinct_by<G: Gen, K, F>(elem: G, key: F) -> SlicesOfDistinct<G, F>
where
    K: Hash + Eq,
    F: Fn(&G::Value) -> K,
{
    slices_of_n_distinct_by(elem, 0, DEFAULT_MAX_LEN, key)
}

pub fn slices_of_n_distinct_by<G: Gen, K, F>(
    elem: G,
    min: usize,
    max: usize,
    key: F,
) -> SlicesOfDistinct<G, F>
where
    K: Hash + Eq,
    F: Fn(&G::Value) -> K,
{
    assert!(min <= max, "slices_of_n_distinct: empty length range [{}, {}]", min, max);
    SlicesOfDistinct { elem, min, max, key }
}

impl<G: Gen, K, F> Gen for SlicesOfDistinct<G, F>
where
    K: Hash + Eq,
    F: Fn(&G::Value) -> K,
{
    type Value = Vec<G::Value>;

    fn generate(&self, t: &mut T) -> Vec<G::Value> {
        let cap = t.cfg.distinct_tries_factor * self.max.max(1);
        let mut rep = Repeat::new(self.min, self.max, expected_len(self.min, self.max));
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut tries = 0;
        while rep.more(&mut t.s, "slice elem") {
            let v = self.elem.value(t);
            if seen.insert((self.key)(&v)) {
                out.push(v);
            } else {
                rep.reject();
                tries += 1;
                if tries >= cap {
                    rep.stop();
                }
            }
        }
        if out.len() < self.min {
            panic_any(Invalid::new("distinct slice: min length unreachable within budget"));
        }
        out
    }

    fn label(&self) -> &'static str {
        "distinct slice"
    }
}

/// `HashMap` with keys from `key` and values from `val`, size in
/// `[min, max]`. Entries are distinct by drawn key; collisions follow the
/// same reject-in-place protocol as distinct slices.
pub struct MapsOf<KG, VG> {
    key: KG,
    val: VG,
    min: usize,
    max: usize,
}

pub fn maps_of<KG: Gen, VG: Gen>(key: KG, val: VG) -> MapsOf<KG, VG>
where
    KG::Value: Hash + Eq,
{
    maps_of_n(key, val, 0, DEFAULT_MAX_LEN)
}

pub fn maps_of_n<KG: Gen, VG: Gen>(key: KG, val: VG, min: usize, max: usize) -> MapsOf<KG, VG>
where
    KG::Value: Hash + Eq,
{
    assert!(min <= max, "maps_of_n: empty size range [{}, {}]", min, max);
    MapsOf { key, val, min, max }
}

impl<KG: Gen, VG: Gen> Gen for MapsOf<KG, VG>
where
    KG::Value: Hash + Eq,
{
    type Value = HashMap<KG::Value, VG::Value>;

    fn generate(&self, t: &mut T) -> Self::Value {
        let cap = t.cfg.distinct_tries_factor * self.max.max(1);
        let mut rep = Repeat::new(self.min, self.max, expected_len(self.min, self.max));
        let mut out = HashMap::new();
        let mut tries = 0;
        while rep.more(&mut t.s, "map elem") {
            let k = self.key.value(t);
            if out.contains_key(&k) {
                rep.reject();
                tries += 1;
                if tries >= cap {
                    rep.stop();
                }
                continue;
            }
            let v = self.val.value(t);
            out.insert(k, v);
        }
        if out.len() < self.min {
            panic_any(Invalid::new("map: min size unreachable within budget"));
        }
        out
    }

    fn label(&self) -> &'static str {
        "map"
    }
}

/// `HashMap` whose keys are derived from the values: every entry
/// satisfies `k == key_fn(v)`. Size in `[min, max]`, distinct by derived
/// key.
pub struct MapsOfValues<VG, F> {
    val: VG,
    min: usize,
    max: usize,
    key_fn: F,
}

pub fn maps_of_values<VG: Gen, K, F>(val: VG, key_fn: F) -> MapsOfValues<VG, F>
where
    K: Hash + Eq + fmt::Debug,
    F: Fn(&VG::Value) -> K,
{
    maps_of_n_values(val, 0, DEFAULT_MAX_LEN, key_fn)
}

pub fn maps_of_n_values<VG: Gen, K, F>(
    val: VG,
    min: usize,
    max: usize,
    key_fn: F,
) -> MapsOfValues<VG, F>
where
    K: Hash + Eq + fmt::Debug,
    F: Fn(&VG::Value) -> K,
{
    assert!(min <= max, "maps_of_n_values: empty size range [{}, {}]", min, max);
    MapsOfValues { val, min, max, key_fn }
}

impl<VG: Gen, K, F> Gen for MapsOfValues<VG, F>
where
    K: Hash + Eq + fmt::Debug,
    F: Fn(&VG::Value) -> K,
{
    type Value = HashMap<K, VG::Value>;

    fn generate(&self, t: &mut T) -> Self::Value {
        let cap = t.cfg.distinct_tries_factor * self.max.max(1);
        let mut rep = Repeat::new(self.min, self.max, expected_len(self.min, self.max));
        let mut out = HashMap::new();
        let mut tries = 0;
        while rep.more(&mut t.s, "map elem") {
            let v = self.val.value(t);
            let k = (self.key_fn)(&v);
            if out.contains_key(&k) {
                rep.reject();
                tries += 1;
                if tries >= cap {
                    rep.stop();
                }
                continue;
            }
            out.insert(k, v);
        }
        if out.len() < self.min {
            panic_any(Invalid::new("map: min size unreachable within budget"));
        }
        out
    }

    fn label(&self) -> &'static str {
        "map"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{replayed, run_checks, CheckError, Config, DefaultHarness};
    use crate::ints::{booleans, ints, uints_range};

    #[test]
    fn test_shrinks_failing_list_to_single_zero() {
        // "every integer list is empty" is falsified by any non-empty list;
        // the minimal counterexample is [0]
        let cfg = Config { seed: Some(100), ..Config::default() };
        let h = DefaultHarness::new("list");
        let prop = |t: &mut T| {
            let v = t.draw(&slices_of(ints()), "v");
            if !v.is_empty() {
                t.fatal(format!("non-empty list {:?}", v));
            }
        };
        let err = run_checks(&cfg, &h, &prop).unwrap_err();
        let CheckError::Failed { buffer, .. } = err else {
            panic!("expected a failure, got {:?}", err)
        };
        assert_eq!(replayed(&buffer, &slices_of(ints())), vec![0]);
    }

    #[test]
    fn test_shrinks_unequal_map_values_to_zero_and_one() {
        // maps with at least two entries and unequal values shrink to two
        // entries with the value set {0, 1}
        let cfg = Config { seed: Some(101), ..Config::default() };
        let h = DefaultHarness::new("map");
        let prop = |t: &mut T| {
            let m = t.draw(&maps_of(ints(), ints()), "m");
            t.assume(m.len() >= 2);
            let mut vals: Vec<i64> = m.values().copied().collect();
            vals.sort_unstable();
            vals.dedup();
            if vals.len() > 1 {
                t.fatal(format!("unequal values {:?}", vals));
            }
        };
        let err = run_checks(&cfg, &h, &prop).unwrap_err();
        let CheckError::Failed { buffer, .. } = err else {
            panic!("expected a failure, got {:?}", err)
        };
        let m = replayed(&buffer, &maps_of(ints(), ints()));
        assert_eq!(m.len(), 2);
        let mut vals: Vec<i64> = m.values().copied().collect();
        vals.sort_unstable();
        assert_eq!(vals, vec![0, 1]);
    }

    #[test]
    fn test_collection_lengths_stay_within_bounds() {
        let cfg = Config { seed: Some(102), ..Config::default() };
        let h = DefaultHarness::new("len limits");
        run_checks(&cfg, &h, &|t: &mut T| {
            let min = t.draw(&uints_range(0, 12), "min") as usize;
            let max = min + t.draw(&uints_range(0, 6), "extra") as usize;
            let s = t.draw(&slices_of_n(ints(), min, max), "s");
            if s.len() < min || s.len() > max {
                t.fatal(format!("slice len {} outside [{}, {}]", s.len(), min, max));
            }
            let d = t.draw(&slices_of_n_distinct(ints(), min, max), "d");
            if d.len() < min || d.len() > max {
                t.fatal(format!("distinct len {} outside [{}, {}]", d.len(), min, max));
            }
            let m = t.draw(&maps_of_n(ints(), ints(), min, max), "m");
            if m.len() < min || m.len() > max {
                t.fatal(format!("map size {} outside [{}, {}]", m.len(), min, max));
            }
        })
        .unwrap();
    }

    #[test]
    fn test_distinct_by_key_is_injective() {
        let cfg = Config { seed: Some(103), ..Config::default() };
        let h = DefaultHarness::new("distinct");
        run_checks(&cfg, &h, &|t: &mut T| {
            let s = t.draw(&slices_of_distinct_by(ints(), |v: &i64| v.rem_euclid(5)), "s");
            let keys: HashSet<i64> = s.iter().map(|v| v.rem_euclid(5)).collect();
            if keys.len() != s.len() {
                t.fatal(format!("{} unique keys out of {} elements", keys.len(), s.len()));
            }
        })
        .unwrap();
    }

    #[test]
    fn test_maps_of_values_couple_keys_to_values() {
        let cfg = Config { seed: Some(104), ..Config::default() };
        let h = DefaultHarness::new("maps of values");
        run_checks(&cfg, &h, &|t: &mut T| {
            let m = t.draw(&maps_of_values(ints(), |v: &i64| v.wrapping_mul(3)), "m");
            for (k, v) in &m {
                if *k != v.wrapping_mul(3) {
                    t.fatal(format!("key {} does not match value {}", k, v));
                }
            }
        })
        .unwrap();
    }

    #[test]
    fn test_unreachable_distinct_minimum_rejects_the_case() {
        // only two distinct booleans exist, so a 3-element distinct slice
        // can never reach its minimum and every case is discarded
        let cfg = Config { seed: Some(106), checks: 5, max_discards: 10, ..Config::default() };
        let h = DefaultHarness::new("distinct");
        let err = run_checks(&cfg, &h, &|t: &mut T| {
            let _ = t.draw(&slices_of_n_distinct(booleans(), 3, 3), "s");
        })
        .unwrap_err();
        assert!(matches!(err, CheckError::CannotGenerate { .. }));
    }

    #[test]
    fn test_arrays_have_exact_length() {
        let cfg = Config { seed: Some(105), ..Config::default() };
        let h = DefaultHarness::new("arrays");
        for n in [0usize, 1, 3, 17] {
            run_checks(&cfg, &h, &|t: &mut T| {
                let a = t.draw(&arrays_of(n, ints()), "a");
                if a.len() != n {
                    t.fatal(format!("array len {} instead of {}", a.len(), n));
                }
            })
            .unwrap();
        }
    }
}

//! The check loop: runs a property against generated inputs, classifies
//! outcomes, and drives shrinking on the first failure.
//!
//! A property is a plain `Fn(&mut T)`. It signals failure through
//! [`T::fatal`] or by panicking; [`check_once`] is the only panic barrier,
//! converting whatever unwinds out of the property into a classified
//! verdict while the recording made so far stays intact. Everything above
//! that barrier is ordinary `Result` plumbing.

use std::cell::{Cell, RefCell};
use std::env;
use std::fmt;
use std::panic::{self, catch_unwind, panic_any, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Once;
use std::time::Duration;

use once_cell::sync::Lazy;

use crate::data::{BitStream, Failed, Invalid, OutOfData, PanicError, T};
use crate::shrinking::{Shrinker, Shrunk};

/// Per-check configuration. The defaults are what [`check`] uses, after
/// applying `REFUTE_*` environment overrides.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of passing runs required before the property is accepted.
    pub checks: u32,
    /// Base PRNG seed; `None` picks one from process entropy. Run `i`
    /// uses `seed + i`, and a reported failure names the exact seed.
    pub seed: Option<u64>,
    /// Threshold below which the block minimizer just sweeps all values.
    pub small: u64,
    /// Wall-clock budget for one shrink run.
    pub shrink_time_limit: Duration,
    /// Discarded-case budget: rejections (failed assumptions, exhausted
    /// filters, replay starvation) allowed before giving up on generation.
    pub max_discards: u32,
    /// Distinctness retry cap, as a multiple of the collection's maximum
    /// length.
    pub distinct_tries_factor: usize,
    /// Redraw attempts before a filter rejects the whole test case.
    pub filter_tries: usize,
    /// Log each draw and shrink step at debug level.
    pub debug: bool,
    /// Write a `vis-<name>.html` trace of accepted shrink steps.
    pub debugvis: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            checks: 100,
            seed: None,
            small: 5,
            shrink_time_limit: Duration::from_secs(30),
            max_discards: 1000,
            distinct_tries_factor: 10,
            filter_tries: 100,
            debug: false,
            debugvis: false,
        }
    }
}

impl Config {
    /// Defaults with `REFUTE_CHECKS`, `REFUTE_SEED`, `REFUTE_SMALL`,
    /// `REFUTE_SHRINK_TIME_LIMIT` (seconds), `REFUTE_MAX_DISCARDS`,
    /// `REFUTE_DEBUG` and `REFUTE_DEBUGVIS` applied on top.
    pub fn from_env() -> Config {
        let mut cfg = Config::default();
        if let Some(v) = env_var("REFUTE_CHECKS") {
            cfg.checks = v;
        }
        if let Some(v) = env_var("REFUTE_SEED") {
            cfg.seed = Some(v);
        }
        if let Some(v) = env_var("REFUTE_SMALL") {
            cfg.small = v;
        }
        if let Some(v) = env_var("REFUTE_SHRINK_TIME_LIMIT") {
            cfg.shrink_time_limit = Duration::from_secs(v);
        }
        if let Some(v) = env_var("REFUTE_MAX_DISCARDS") {
            cfg.max_discards = v;
        }
        cfg.debug = env_flag("REFUTE_DEBUG");
        cfg.debugvis = env_flag("REFUTE_DEBUGVIS");
        cfg
    }
}

fn env_var<V: FromStr>(key: &str) -> Option<V> {
    let raw = env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring unparsable {}={:?}", key, raw);
            None
        }
    }
}

fn env_flag(key: &str) -> bool {
    matches!(env::var(key).ok().as_deref(), Some("1") | Some("true"))
}

static ENV_CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

/// What a check reports upward when it does not pass.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(
        "property failed after {checks} passing checks (seed {seed}): {message}; \
         minimized buffer {buffer:?}"
    )]
    Failed {
        checks: u32,
        seed: u64,
        message: String,
        buffer: Vec<u64>,
    },

    #[error(
        "nondeterministic property: two replays of buffer {buffer:?} disagreed: \
         first {expected}, then {got}"
    )]
    Nondeterministic {
        buffer: Vec<u64>,
        expected: String,
        got: String,
    },

    #[error("unable to generate enough valid test cases: {discards} discarded, {valid} valid")]
    CannotGenerate { valid: u32, discards: u32 },
}

/// Minimal test-harness capability the engine reports through. The
/// default implementation panics on failure, which is the right behavior
/// inside `#[test]` functions; embedders can adapt their own harness.
pub trait Harness {
    fn name(&self) -> &str;
    fn log(&self, args: fmt::Arguments<'_>);
    fn fail(&self, err: &CheckError);
}

pub struct DefaultHarness {
    name: String,
}

impl DefaultHarness {
    pub fn new(name: impl Into<String>) -> DefaultHarness {
        DefaultHarness { name: name.into() }
    }
}

impl Harness for DefaultHarness {
    fn name(&self) -> &str {
        &self.name
    }

    fn log(&self, args: fmt::Arguments<'_>) {
        log::info!("[{}] {}", self.name, args);
    }

    fn fail(&self, err: &CheckError) {
        panic!("[{}] {}", self.name, err);
    }
}

/// Checks `prop` with the environment-derived default configuration,
/// panicking on failure with the minimized counterexample in the message.
pub fn check<P: Fn(&mut T)>(prop: P) {
    check_with(&ENV_CONFIG, prop);
}

/// Checks `prop` under an explicit configuration.
pub fn check_with<P: Fn(&mut T)>(cfg: &Config, prop: P) {
    let h = DefaultHarness::new("check");
    if let Err(err) = run_checks(cfg, &h, &prop) {
        h.fail(&err);
    }
}

/// Wraps a property as a ready-to-run closure, for registering the same
/// check under several subtests.
pub fn make_check<P: Fn(&mut T)>(cfg: Config, prop: P) -> impl Fn() {
    move || check_with(&cfg, &prop)
}

/// Rejects the current test case unless `cond` holds. Usable from
/// anywhere below a check without threading the context through.
pub fn assume(cond: bool) {
    if !cond {
        panic_any(Invalid::new("assumption violated"));
    }
}

/// The full check loop: generates cases until `cfg.checks` pass, a
/// failure shrinks and surfaces, or the discard budget runs out. Returns
/// the number of passing runs.
pub fn run_checks<P: Fn(&mut T)>(
    cfg: &Config,
    harness: &dyn Harness,
    prop: &P,
) -> Result<u32, CheckError> {
    install_panic_hook();

    let base_seed = cfg.seed.unwrap_or_else(rand::random);
    let mut valid = 0u32;
    let mut discards = 0u32;
    let mut idx = 0u64;
    while valid < cfg.checks {
        let seed = base_seed.wrapping_add(idx);
        idx += 1;

        let mut t = T::new(harness.name(), BitStream::random(seed), cfg);
        match check_once(&mut t, prop) {
            Verdict::Pass => valid += 1,
            Verdict::Invalid(reason) => {
                if cfg.debug {
                    log::debug!("[{}] discarded case: {}", harness.name(), reason);
                }
                discards += 1;
                if discards > cfg.max_discards {
                    return Err(CheckError::CannotGenerate { valid, discards });
                }
            }
            Verdict::Fail(err) => {
                harness.log(format_args!(
                    "failed after {} passing checks (seed {}), shrinking",
                    valid, seed
                ));
                let rec = t.into_recorded();
                return Err(
                    match Shrinker::new(cfg, harness.name(), rec, err, prop).shrink() {
                        Shrunk::Minimized { buffer, error } => CheckError::Failed {
                            checks: valid,
                            seed,
                            message: error.message,
                            buffer,
                        },
                        Shrunk::Flaky { buffer, expected, got } => CheckError::Nondeterministic {
                            buffer,
                            expected: expected.to_string(),
                            got: got.map_or_else(|| "no failure".to_string(), |e| e.to_string()),
                        },
                    },
                );
            }
        }
    }
    Ok(valid)
}

/// Outcome of a single property invocation.
pub(crate) enum Verdict {
    Pass,
    Invalid(String),
    Fail(PanicError),
}

/// Runs the property once, converting anything that unwinds out of it
/// into a verdict. A panicking property still leaves a valid recording in
/// `t`: blocks are appended before control can leave the stream.
pub(crate) fn check_once(t: &mut T, prop: &impl Fn(&mut T)) -> Verdict {
    install_panic_hook();
    IN_CHECK.with(|c| c.set(true));
    let result = catch_unwind(AssertUnwindSafe(|| prop(t)));
    IN_CHECK.with(|c| c.set(false));
    match result {
        Ok(()) => Verdict::Pass,
        Err(payload) => classify_panic(payload),
    }
}

fn classify_panic(payload: Box<dyn std::any::Any + Send>) -> Verdict {
    let trace = take_panic_trace();

    let payload = match payload.downcast::<Failed>() {
        Ok(f) => {
            return Verdict::Fail(PanicError {
                message: f.message,
                trace: f.location.to_string(),
            })
        }
        Err(p) => p,
    };
    let payload = match payload.downcast::<Invalid>() {
        Ok(inv) => return Verdict::Invalid(inv.reason),
        Err(p) => p,
    };
    if payload.is::<OutOfData>() {
        return Verdict::Invalid("out of data".to_string());
    }

    // an ordinary panic: assertion failure, arithmetic overflow, ...
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    };
    Verdict::Fail(PanicError { message, trace })
}

thread_local! {
    static IN_CHECK: Cell<bool> = const { Cell::new(false) };
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Installs the process-wide panic hook once. While a check is in flight
/// on the current thread the hook captures the panic site for the failure
/// fingerprint and stays quiet; panics on other threads, or outside a
/// check, go to the previously installed hook untouched. The fingerprint
/// is the panic location alone: it has to be identical whether the
/// failure was reached from generation or from a shrink replay, so the
/// engine's own frames must not leak into it.
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let prev = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if IN_CHECK.with(|c| c.get()) {
                let loc = info
                    .location()
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                PANIC_TRACE.with(|t| *t.borrow_mut() = Some(loc));
            } else {
                prev(info);
            }
        }));
    });
}

fn take_panic_trace() -> String {
    PANIC_TRACE.with(|t| t.borrow_mut().take()).unwrap_or_default()
}

/// Replays a minimized buffer through a generator to recover the typed
/// counterexample.
#[cfg(test)]
pub(crate) fn replayed<G: crate::generator::Gen>(buf: &[u64], g: &G) -> G::Value {
    let cfg = Config::default();
    let mut t = T::new("replay", BitStream::replay(buf.to_vec(), false), &cfg);
    t.draw(g, "v")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ints::uints;

    #[test]
    fn test_default_config_matches_documented_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.checks, 100);
        assert_eq!(cfg.small, 5);
        assert_eq!(cfg.shrink_time_limit, Duration::from_secs(30));
        assert_eq!(cfg.max_discards, 1000);
        assert_eq!(cfg.distinct_tries_factor, 10);
        assert!(cfg.seed.is_none());
    }

    #[test]
    fn test_passing_property_runs_all_checks() {
        let cfg = Config { seed: Some(1), checks: 50, ..Config::default() };
        let h = DefaultHarness::new("pass");
        let ran = run_checks(&cfg, &h, &|t: &mut T| {
            let _ = t.draw(&uints(), "x");
        })
        .unwrap();
        assert_eq!(ran, 50);
    }

    #[test]
    fn test_assume_discards_without_failing() {
        let cfg = Config { seed: Some(2), checks: 20, ..Config::default() };
        let h = DefaultHarness::new("assume");
        run_checks(&cfg, &h, &|t: &mut T| {
            let x = t.draw(&uints(), "x");
            t.assume(x % 2 == 0);
        })
        .unwrap();
    }

    #[test]
    fn test_always_false_assumption_exhausts_budget() {
        let cfg = Config { seed: Some(3), max_discards: 30, ..Config::default() };
        let h = DefaultHarness::new("assume");
        let err = run_checks(&cfg, &h, &|_t: &mut T| {
            assume(false);
        })
        .unwrap_err();
        let CheckError::CannotGenerate { valid, discards } = err else {
            panic!("expected CannotGenerate, got {:?}", err)
        };
        assert_eq!(valid, 0);
        assert_eq!(discards, 31);
    }

    #[test]
    fn test_replay_starvation_is_a_discard() {
        let cfg = Config::default();
        let mut t = T::new("oom", BitStream::replay(Vec::new(), false), &cfg);
        let verdict = check_once(&mut t, &|t: &mut T| {
            let _ = t.draw(&uints(), "x");
        });
        assert!(matches!(verdict, Verdict::Invalid(_)));
    }

    #[test]
    fn test_drawless_failure_minimizes_to_empty_buffer() {
        let cfg = Config { seed: Some(4), ..Config::default() };
        let h = DefaultHarness::new("always fails");
        let err = run_checks(&cfg, &h, &|t: &mut T| {
            t.fatal("boom");
        })
        .unwrap_err();
        let CheckError::Failed { checks, message, buffer, .. } = err else {
            panic!("expected Failed, got {:?}", err)
        };
        assert_eq!(checks, 0);
        assert_eq!(message, "boom");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_plain_panic_is_a_failure_and_shrinks() {
        let cfg = Config { seed: Some(5), ..Config::default() };
        let h = DefaultHarness::new("panic");
        let err = run_checks(&cfg, &h, &|t: &mut T| {
            let x = t.draw(&uints(), "x");
            if x > 0 {
                panic!("kaboom");
            }
        })
        .unwrap_err();
        let CheckError::Failed { message, buffer, .. } = err else {
            panic!("expected Failed, got {:?}", err)
        };
        assert_eq!(message, "kaboom");
        assert_eq!(buffer, vec![1]);
    }

    #[test]
    fn test_check_with_panics_on_failure() {
        let cfg = Config { seed: Some(6), ..Config::default() };
        let caught = catch_unwind(|| {
            check_with(&cfg, |t: &mut T| {
                let x = t.draw(&uints(), "x");
                if x >= 5 {
                    t.fatal("too big");
                }
            });
        });
        let msg = *caught.unwrap_err().downcast::<String>().unwrap();
        assert!(msg.contains("too big"), "unexpected panic message: {}", msg);
        assert!(msg.contains("minimized buffer [5]"), "unexpected panic message: {}", msg);
    }

    #[test]
    fn test_make_check_wraps_a_passing_property() {
        let cfg = Config { seed: Some(8), checks: 10, ..Config::default() };
        let run = make_check(cfg, |t: &mut T| {
            let _ = t.draw(&uints(), "x");
        });
        run();
        run();
    }

    #[test]
    fn test_draw_and_assume_counters() {
        let cfg = Config::default();
        let mut t = T::new("counters", BitStream::random(9), &cfg);
        let verdict = check_once(&mut t, &|t: &mut T| {
            let _ = t.draw(&uints(), "a");
            let _ = t.draw(&uints(), "b");
            t.assume(true);
        });
        assert!(matches!(verdict, Verdict::Pass));
        assert_eq!(t.draws(), 2);
        assert_eq!(t.assumes(), 1);
    }
}

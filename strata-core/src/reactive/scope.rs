//! Scopes
//!
//! Entry points that change the ambient context for the duration of a
//! closure: ownership roots, batches, untracked reads, and sub-clocks.

use tracing::debug;

use crate::error::{catch, unwrap_or_raise, ReactiveError, Result};
use crate::graph::{ClockId, NodeId, State};

use super::context::{Context, Owner};
use super::runtime::Runtime;

/// Run `f` as an ownership root.
///
/// Computations created inside are never disposed by an enclosing
/// computation; they live until the program drops every reference to them.
/// Reads made directly inside `f` are still tracked by the enclosing
/// computation, if there is one.
pub fn root<T>(f: impl FnOnce() -> T) -> T {
    unwrap_or_raise(try_root(f))
}

pub fn try_root<T>(f: impl FnOnce() -> T) -> Result<T> {
    catch(|| {
        Runtime::with(|rt| {
            let _ctx = rt.enter(Context {
                owner: Some(Owner::Unowned),
                ..rt.context()
            });
            Ok(f())
        })
    })
}

/// Handle that tears down a disposable root and everything it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposer {
    node: NodeId,
}

impl Disposer {
    /// Dispose the root. Inside a propagation the teardown happens at the end
    /// of the current round.
    pub fn dispose(&self) {
        unwrap_or_raise(self.try_dispose())
    }

    pub fn try_dispose(&self) -> Result<()> {
        catch(|| Runtime::with(|rt| rt.request_dispose(self.node)))
    }
}

/// Run `f` as an ownership root that can be disposed through the
/// [`Disposer`] it receives.
pub fn root_with_disposer<T>(f: impl FnOnce(Disposer) -> T) -> T {
    unwrap_or_raise(try_root_with_disposer(f))
}

pub fn try_root_with_disposer<T>(f: impl FnOnce(Disposer) -> T) -> Result<T> {
    catch(|| {
        Runtime::with(|rt| {
            let node = rt.graph_mut().new_node(rt.current_clock(), None);
            let _ctx = rt.enter(Context {
                owner: Some(Owner::Node(node)),
                ..rt.context()
            });
            Ok(f(Disposer { node }))
        })
    })
}

/// Run `f` as a batch.
///
/// Writes inside are held back and committed together when `f` returns,
/// followed by one propagation. Inside a propagation this is a no-op wrapper.
/// If the batch fails, none of its writes are committed.
pub fn freeze<T>(f: impl FnOnce() -> T) -> T {
    unwrap_or_raise(try_freeze(f))
}

pub fn try_freeze<T>(f: impl FnOnce() -> T) -> Result<T> {
    if Runtime::is_propagating() {
        return catch(|| Ok(f()));
    }

    let result = catch(|| {
        Runtime::with(|rt| {
            let _ctx = rt.enter(Context {
                clock: Some(ClockId::ROOT),
                ..rt.context()
            });
            rt.graph_mut().reset_clock(ClockId::ROOT);

            let result = f();
            rt.event()?;
            Ok(result)
        })
    });
    if let Err(err) = &result {
        debug!(error = %err, "batch failed, dropping queued commits");
        Runtime::with(|rt| rt.abandon());
    }
    result
}

/// Run `f` without registering any of its reads as dependencies.
pub fn sample<T>(f: impl FnOnce() -> T) -> T {
    Runtime::with(|rt| {
        let _ctx = rt.enter(Context {
            reader: None,
            ..rt.context()
        });
        f()
    })
}

/// Register `f` to run before the current owner reruns or is disposed.
///
/// `f` receives `true` on final teardown and `false` before a rerun.
pub fn cleanup(f: impl FnMut(bool) + 'static) {
    unwrap_or_raise(try_cleanup(f))
}

pub fn try_cleanup(f: impl FnMut(bool) + 'static) -> Result<()> {
    Runtime::with(|rt| match rt.context().owner {
        None => Err(ReactiveError::CleanupOutsideComputation),
        Some(Owner::Unowned) => {
            debug!("cleanup registered on an undisposable root is never run");
            Ok(())
        }
        Some(Owner::Node(node)) => {
            if let Some(n) = rt.graph_mut().nodes.get_mut(node) {
                n.cleanups.push(Box::new(f));
            }
            Ok(())
        }
    })
}

/// A nested scheduling domain.
///
/// Writes made while the sub-clock runs propagate to completion inside it
/// before [`SubClock::run`] returns; the enclosing domain sees only the
/// settled result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubClock {
    clock: ClockId,
}

impl SubClock {
    /// Run `f` in this domain and settle it.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        unwrap_or_raise(self.try_run(f))
    }

    pub fn try_run<T>(&self, f: impl FnOnce() -> T) -> Result<T> {
        catch(|| {
            Runtime::with(|rt| {
                let result = {
                    let _ctx = rt.enter(Context {
                        clock: Some(self.clock),
                        ..rt.context()
                    });
                    rt.graph_mut().clocks[self.clock].state = State::Stale;
                    f()
                };

                let _ctx = rt.enter(Context {
                    clock: Some(self.clock),
                    ..rt.context()
                });
                rt.graph_mut().clocks[self.clock].subtime += 1;
                rt.run(self.clock)?;
                Ok(result)
            })
        })
    }

    /// Depth of this domain below the root.
    pub fn depth(&self) -> u32 {
        Runtime::with(|rt| rt.graph().clocks.depth(self.clock))
    }

    pub(crate) fn clock(&self) -> ClockId {
        self.clock
    }
}

/// Create a sub-clock under the current domain.
pub fn subclock_batcher() -> SubClock {
    Runtime::with(|rt| {
        let parent = rt.current_clock();
        let clock = rt.graph_mut().clocks.spawn(parent);
        debug!(clock = clock.index(), parent = parent.index(), "created sub-clock");
        SubClock { clock }
    })
}

/// Create a sub-clock under the current domain and run `f` in it.
///
/// The clock lives on only while computations or cells created inside it
/// do; once the last of them is gone it is released.
pub fn subclock<T>(f: impl FnOnce() -> T) -> T {
    unwrap_or_raise(try_subclock(f))
}

pub fn try_subclock<T>(f: impl FnOnce() -> T) -> Result<T> {
    let batcher = subclock_batcher();
    let result = batcher.try_run(f);
    Runtime::with(|rt| rt.retire_clock(batcher.clock));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{computation, is_tracking, value_cell};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn root_gives_an_owner() {
        let c = root(|| computation(|| 7));
        assert_eq!(c.get(), 7);
    }

    #[test]
    fn sample_suspends_tracking() {
        root(|| {
            let source = value_cell(1);
            let runs = Rc::new(Cell::new(0));
            let counter = runs.clone();
            computation(move || {
                assert!(is_tracking());
                sample(|| {
                    assert!(!is_tracking());
                    source.get()
                });
                counter.set(counter.get() + 1);
            });

            source.set(2);
            assert_eq!(runs.get(), 1);
        });
    }

    #[test]
    fn cleanup_outside_owner_is_rejected() {
        assert_eq!(
            try_cleanup(|_| {}),
            Err(ReactiveError::CleanupOutsideComputation)
        );
    }

    #[test]
    fn cleanup_on_plain_root_is_accepted() {
        assert_eq!(root(|| try_cleanup(|_| {})), Ok(()));
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_dispose() {
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let log = seen.clone();
        let source = value_cell(0);
        root_with_disposer(move |disposer| {
            computation(move || {
                source.get();
                let log = log.clone();
                cleanup(move |last| log.borrow_mut().push(last));
            });
            source.set(1);
            disposer.dispose();
        });
        source.set(2);
        assert_eq!(*seen.borrow(), vec![false, true]);
    }

    #[test]
    fn root_inside_computation_keeps_tracking() {
        root(|| {
            let source = value_cell(0);
            let runs = Rc::new(Cell::new(0));
            let counter = runs.clone();
            computation(move || {
                root(|| {
                    assert!(is_tracking());
                    source.get()
                });
                counter.set(counter.get() + 1);
            });

            source.set(1);
            assert_eq!(runs.get(), 2);
        });
    }

    #[test]
    fn failed_batch_commits_nothing() {
        let a = value_cell(0);
        let result = try_freeze(|| {
            a.set(1);
            a.set(2);
        });
        assert!(result.is_err());
        assert_eq!(a.get(), 0);

        assert_eq!(try_freeze(|| a.set(5)), Ok(5));
        assert_eq!(a.get(), 5);
    }

    #[test]
    fn transient_subclock_is_released() {
        let before = Runtime::stats().clocks;
        let value = root(|| subclock(|| 4));
        assert_eq!(value, 4);
        assert_eq!(Runtime::stats().clocks, before);

        let batcher = root(subclock_batcher);
        assert_eq!(Runtime::stats().clocks, before + 1);
        assert_eq!(batcher.depth(), 1);
    }

    #[test]
    fn freeze_inside_propagation_runs_inline() {
        root(|| {
            let source = value_cell(0);
            let sink = value_cell(0);
            computation(move || {
                let v = source.get();
                freeze(|| sink.set(v));
            });
            source.set(3);
            assert_eq!(sink.get(), 3);
        });
    }

    #[test]
    fn subclock_runs_nested_domain() {
        let batcher = root(subclock_batcher);
        assert_eq!(batcher.depth(), 1);

        let seen = batcher.run(|| {
            root(|| {
                let a = value_cell(1);
                let b = computation(move || a.get() + 1);
                a.set(2);
                b
            })
        });
        assert_eq!(seen.get(), 3);
    }

    #[test]
    fn disposer_inside_propagation_is_deferred() {
        root(|| {
            let kill = value_cell(false);
            let (child, disposer) = root_with_disposer(|disposer| {
                (computation(|| 1), disposer)
            });
            computation(move || {
                if kill.get() {
                    disposer.dispose();
                }
            });
            assert!(!child.is_disposed());
            kill.set(true);
            assert!(child.is_disposed());
        });
    }
}

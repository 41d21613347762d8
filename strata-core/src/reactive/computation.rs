//! Computations
//!
//! A computation runs its body once on creation and again whenever a value
//! it read during its previous run changes. Reading a computation returns the
//! value its body last produced and, inside another computation, makes the
//! reader depend on it.
//!
//! Computations are owned. Creating one requires an owner (a root or another
//! computation), and when the owner reruns or is disposed the computation is
//! disposed with it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{catch, unwrap_or_raise, ReactiveError, Result};
use crate::graph::NodeId;

use super::runtime::Runtime;
use super::scope::sample;

/// Read handle to a computation's latest value.
pub struct Computation<T> {
    node: NodeId,
    latest: Rc<RefCell<Option<T>>>,
}

impl<T: Clone + 'static> Computation<T> {
    /// The value the body last produced.
    ///
    /// Inside another computation this registers a dependency and brings the
    /// computation up to date first if it is stale. A disposed computation
    /// keeps returning its last value.
    pub fn get(&self) -> T {
        unwrap_or_raise(self.try_get())
    }

    pub fn try_get(&self) -> Result<T> {
        catch(|| {
            Runtime::with(|rt| {
                if rt.context().reader.is_some() && rt.is_live(self.node) {
                    rt.read_node(self.node)
                } else {
                    Ok(())
                }
            })?;
            self.latest
                .borrow()
                .clone()
                .ok_or(ReactiveError::CircularDependency)
        })
    }

    /// Whether the computation has been torn down.
    pub fn is_disposed(&self) -> bool {
        !Runtime::with(|rt| rt.is_live(self.node))
    }
}

impl<T> Clone for Computation<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            latest: Rc::clone(&self.latest),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("node", &self.node)
            .field("latest", &*self.latest.borrow())
            .finish()
    }
}

// Wrap `body` so each run feeds it the previous value and stores the next.
fn create<T, F>(seed: Option<T>, mut body: F) -> Result<Computation<T>>
where
    T: Clone + 'static,
    F: FnMut(Option<T>) -> T + 'static,
{
    let latest = Rc::new(RefCell::new(seed));
    let slot = Rc::clone(&latest);
    let recompute = move || {
        let prev = slot.borrow().clone();
        let next = body(prev);
        *slot.borrow_mut() = Some(next);
    };

    let node = catch(|| Runtime::with(|rt| rt.create_node(Box::new(recompute))))?;
    Ok(Computation { node, latest })
}

/// Create a computation from a body that ignores its previous value.
///
/// # Example
///
/// ```rust
/// use strata_core::reactive::{computation, root, value_cell};
///
/// root(|| {
///     let a = value_cell(1);
///     let b = value_cell(2);
///     let sum = computation(move || a.get() + b.get());
///     assert_eq!(sum.get(), 3);
/// });
/// ```
pub fn computation<T, F>(f: F) -> Computation<T>
where
    T: Clone + 'static,
    F: FnMut() -> T + 'static,
{
    unwrap_or_raise(try_computation(f))
}

pub fn try_computation<T, F>(mut f: F) -> Result<Computation<T>>
where
    T: Clone + 'static,
    F: FnMut() -> T + 'static,
{
    create(None, move |_| f())
}

/// Create a computation whose body folds over its previous value,
/// starting from `seed`.
pub fn computation_with<T, F>(f: F, seed: T) -> Computation<T>
where
    T: Clone + 'static,
    F: FnMut(T) -> T + 'static,
{
    unwrap_or_raise(try_computation_with(f, seed))
}

pub fn try_computation_with<T, F>(mut f: F, seed: T) -> Result<Computation<T>>
where
    T: Clone + 'static,
    F: FnMut(T) -> T + 'static,
{
    create(Some(seed.clone()), move |prev| f(prev.unwrap_or_else(|| seed.clone())))
}

/// Create a computation that depends only on what `trigger` reads.
///
/// `f` runs untracked after `trigger` on every run.
pub fn on<T, E, F>(trigger: E, f: F) -> Computation<T>
where
    T: Clone + 'static,
    E: FnMut() + 'static,
    F: FnMut() -> T + 'static,
{
    unwrap_or_raise(try_on(trigger, f))
}

pub fn try_on<T, E, F>(mut trigger: E, mut f: F) -> Result<Computation<T>>
where
    T: Clone + 'static,
    E: FnMut() + 'static,
    F: FnMut() -> T + 'static,
{
    try_computation(move || {
        trigger();
        sample(&mut f)
    })
}

/// Create a computation that depends only on what `trigger` reads and folds
/// `f` over its previous value.
///
/// With `onchanges` set, the first run only evaluates `trigger` and keeps
/// `seed`; `f` runs from the first change onwards.
pub fn on_with<T, E, F>(trigger: E, f: F, seed: T, onchanges: bool) -> Computation<T>
where
    T: Clone + 'static,
    E: FnMut() + 'static,
    F: FnMut(T) -> T + 'static,
{
    unwrap_or_raise(try_on_with(trigger, f, seed, onchanges))
}

pub fn try_on_with<T, E, F>(mut trigger: E, mut f: F, seed: T, onchanges: bool) -> Result<Computation<T>>
where
    T: Clone + 'static,
    E: FnMut() + 'static,
    F: FnMut(T) -> T + 'static,
{
    let mut skip = onchanges;
    try_computation_with(
        move |value| {
            trigger();
            if skip {
                skip = false;
                value
            } else {
                sample(|| f(value))
            }
        },
        seed,
    )
}

/// Combine several triggers into one that reads them in order.
pub fn any_of(mut triggers: Vec<Box<dyn FnMut()>>) -> impl FnMut() {
    move || {
        for trigger in triggers.iter_mut() {
            trigger();
        }
    }
}

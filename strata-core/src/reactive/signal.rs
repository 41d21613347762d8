//! Value Cells
//!
//! A [`Signal`] is mutable storage whose reads register dependencies and
//! whose writes schedule propagation.
//!
//! # Write regimes
//!
//! 1. Inside a propagation (a batch, a computation body, a sub-clock) the
//!    write is queued and lands at the start of the next round. A cell takes
//!    at most one value per round; a second, different value is a
//!    [`ReactiveError::ConflictingChanges`].
//!
//! 2. Outside a propagation, if any computation read the cell during its
//!    last run, the value is queued on the root clock and one full
//!    propagation runs before the write returns.
//!
//! 3. Outside a propagation with no readers, the value is stored immediately
//!    and nothing else happens.
//!
//! A [`ValueSignal`] adds an equality filter: writing a value equal to the
//! current one is a no-op, and two different values within the same tick of
//! a propagation are a [`ReactiveError::ConflictingValues`].

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::{catch, unwrap_or_raise, ReactiveError, Result};
use crate::graph::CellId;

use super::runtime::Runtime;

/// A reactive value cell holding a `T`.
///
/// Handles are `Copy`; every copy refers to the same cell.
///
/// # Example
///
/// ```rust
/// use strata_core::reactive::{computation, root, value_cell};
///
/// root(|| {
///     let count = value_cell(1);
///     let doubled = computation(move || count.get() * 2);
///     assert_eq!(doubled.get(), 2);
///
///     count.set(5);
///     assert_eq!(doubled.get(), 10);
/// });
/// ```
pub struct Signal<T> {
    cell: CellId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    /// Create a cell in the current clock's domain.
    ///
    /// A cell created inside a computation or a disposable root is released
    /// with it; reading or writing it afterwards fails with
    /// [`ReactiveError::DisposedCell`].
    pub fn new(value: T) -> Self {
        let cell = Runtime::with(|rt| rt.new_cell(Rc::new(value)));
        Self {
            cell,
            _marker: PhantomData,
        }
    }

    /// Read the committed value, registering a dependency if a computation
    /// is reading.
    pub fn get(&self) -> T {
        unwrap_or_raise(self.try_get())
    }

    pub fn try_get(&self) -> Result<T> {
        catch(|| {
            let value = Runtime::with(|rt| rt.read_cell(self.cell))?;
            Ok(value
                .downcast_ref::<T>()
                .cloned()
                .expect("signal value type mismatch"))
        })
    }

    /// Write a new value. Returns the value written.
    pub fn set(&self, value: T) -> T {
        unwrap_or_raise(self.try_set(value))
    }

    pub fn try_set(&self, value: T) -> Result<T> {
        catch(|| {
            Runtime::with(|rt| {
                rt.write_cell(self.cell, Rc::new(value.clone()), |pending| {
                    let pending = pending.downcast_ref::<T>()?;
                    (*pending != value).then(|| ReactiveError::ConflictingChanges {
                        new: format!("{value:?}"),
                        pending: format!("{pending:?}"),
                    })
                })
            })?;
            Ok(value)
        })
    }

    /// Write `f(current)`, reading the current value without tracking it.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> T {
        let current = super::scope::sample(|| self.get());
        self.set(f(&current))
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Signal<T> {}

impl<T> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal").field("cell", &self.cell.index()).finish()
    }
}

/// Create a value cell.
pub fn value_cell<T>(value: T) -> Signal<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    Signal::new(value)
}

struct ValueState<T> {
    current: T,
    /// Tick of the last differing write made inside a propagation.
    age: Option<u64>,
}

/// A value cell that ignores writes equal to its current value.
pub struct ValueSignal<T> {
    signal: Signal<T>,
    state: Rc<RefCell<ValueState<T>>>,
    eq: Rc<dyn Fn(&T, &T) -> bool>,
}

impl<T> ValueSignal<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    pub fn get(&self) -> T {
        self.signal.get()
    }

    pub fn try_get(&self) -> Result<T> {
        self.signal.try_get()
    }

    /// Write a new value unless it equals the current one.
    pub fn set(&self, value: T) -> T {
        unwrap_or_raise(self.try_set(value))
    }

    pub fn try_set(&self, value: T) -> Result<T> {
        let same = {
            let state = self.state.borrow();
            (self.eq)(&state.current, &value)
        };
        if same {
            return Ok(value);
        }

        let (time, propagating) = Runtime::with(|rt| -> Result<(u64, bool)> {
            Ok((rt.cell_time(self.signal.cell)?, rt.propagating()))
        })?;
        let previous = {
            let mut state = self.state.borrow_mut();
            if state.age == Some(time) {
                return Err(ReactiveError::ConflictingValues {
                    new: format!("{value:?}"),
                    current: format!("{:?}", state.current),
                });
            }
            let age = std::mem::replace(&mut state.age, propagating.then_some(time));
            let current = std::mem::replace(&mut state.current, value.clone());
            (current, age)
        };

        // A rejected write restores the tracked value.
        self.signal.try_set(value).inspect_err(|_| {
            let mut state = self.state.borrow_mut();
            state.current = previous.0.clone();
            state.age = previous.1;
        })
    }

    /// The underlying cell.
    pub fn signal(&self) -> Signal<T> {
        self.signal
    }
}

impl<T> Clone for ValueSignal<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal,
            state: Rc::clone(&self.state),
            eq: Rc::clone(&self.eq),
        }
    }
}

impl<T: Debug> Debug for ValueSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueSignal")
            .field("signal", &self.signal)
            .field("current", &self.state.borrow().current)
            .finish()
    }
}

/// Create a value cell that filters writes with `PartialEq`.
pub fn value_with_equality<T>(value: T) -> ValueSignal<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    value_with_eq(value, |a: &T, b: &T| a == b)
}

/// Create a value cell that filters writes with a custom equality.
pub fn value_with_eq<T>(value: T, eq: impl Fn(&T, &T) -> bool + 'static) -> ValueSignal<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    let signal = Signal::new(value.clone());
    ValueSignal {
        signal,
        state: Rc::new(RefCell::new(ValueState {
            current: value,
            age: None,
        })),
        eq: Rc::new(eq),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{computation, freeze, root, try_freeze};

    #[test]
    fn signal_get_and_set() {
        let signal = value_cell(0);
        assert_eq!(signal.get(), 0);

        assert_eq!(signal.set(42), 42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let signal = value_cell(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn signal_copies_share_state() {
        let s1 = value_cell(0);
        let s2 = s1;

        s1.set(42);
        assert_eq!(s2.get(), 42);
    }

    #[test]
    fn write_inside_batch_is_deferred() {
        let signal = value_cell(1);
        freeze(|| {
            signal.set(2);
            assert_eq!(signal.get(), 1);
        });
        assert_eq!(signal.get(), 2);
    }

    #[test]
    fn same_value_twice_in_batch_is_accepted() {
        let signal = value_cell(0);
        freeze(|| {
            signal.set(1);
            signal.set(1);
        });
        assert_eq!(signal.get(), 1);
    }

    #[test]
    fn conflicting_changes_are_rejected() {
        let signal = value_cell(0);
        let result = try_freeze(|| {
            signal.set(1);
            signal.set(2);
        });
        assert_eq!(
            result.map_err(|e| e.to_string()),
            Err("conflicting changes: 2 != 1".to_string())
        );
    }

    #[test]
    fn value_signal_ignores_equal_writes() {
        root(|| {
            let value = value_with_equality(3);
            let runs = Rc::new(std::cell::Cell::new(0));
            let counter = runs.clone();
            let tracked = value.clone();
            computation(move || {
                tracked.get();
                counter.set(counter.get() + 1);
            });
            assert_eq!(runs.get(), 1);

            value.set(3);
            assert_eq!(runs.get(), 1);
            value.set(4);
            assert_eq!(runs.get(), 2);
        });
    }

    #[test]
    fn value_signal_rejects_two_values_in_one_tick() {
        let value = value_with_equality(1);
        let result = try_freeze(|| {
            value.set(2);
            value.set(3);
        });
        assert_eq!(
            result.map_err(|e| e.to_string()),
            Err("conflicting values: 3 is not the same as 2".to_string())
        );
    }

    #[test]
    fn rejected_write_keeps_tracked_value() {
        let value = value_with_equality(1);
        let result = try_freeze(|| {
            value.signal().set(5);
            value.set(7);
        });
        assert_eq!(
            result,
            Err(ReactiveError::ConflictingChanges {
                new: "7".to_string(),
                pending: "5".to_string(),
            })
        );
        assert_eq!(value.get(), 1);

        value.set(7);
        assert_eq!(value.get(), 7);
    }

    #[test]
    fn value_signal_allows_successive_idle_writes() {
        let value = value_with_equality(1);
        value.set(2);
        value.set(3);
        assert_eq!(value.get(), 3);
    }

    #[test]
    fn custom_equality_filters_writes() {
        let value = value_with_eq(10, |a: &i32, b: &i32| a / 10 == b / 10);
        value.set(15);
        assert_eq!(value.get(), 10);
        value.set(21);
        assert_eq!(value.get(), 21);
    }
}

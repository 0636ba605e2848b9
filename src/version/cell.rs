//! Concrete versioned cells.
//!
//! All constructors return `Rc<Self>`; pass them around as [`Shared<V>`] to
//! build dependency lists. Dependent flavors compute once at construction and
//! afterwards only when pulled while stale.

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use super::{
    freshen, refresh, versions_of, Clock, DataSnapshot, DependentVersion, Reentrancy, Serial,
    Shared, Version, VersionRef, Versioned, VolatileVersion, NULL_SERIAL,
};
use crate::error::{Error, Result};

type Compute<V> = Box<dyn Fn() -> V>;

// =============================================================================
// Immutable
// =============================================================================

/// A value that never changes; serial is always [`NULL_SERIAL`].
#[derive(Debug)]
pub struct ImmutableCell<V> {
    value: V,
}

impl<V: Clone + 'static> ImmutableCell<V> {
    pub fn new(value: V) -> Rc<ImmutableCell<V>> {
        return Rc::new(ImmutableCell { value });
    }
}

impl<V: Clone + 'static> Version for ImmutableCell<V> {
    fn version_serial(&self) -> Serial {
        return NULL_SERIAL;
    }

    fn is_stale(&self) -> bool {
        return false;
    }

    fn is_mutable(&self) -> bool {
        return false;
    }

    fn dependencies(&self) -> Vec<VersionRef> {
        return Vec::new();
    }

    fn next_version(&self) {}
}

impl<V: Clone + 'static> Versioned<V> for ImmutableCell<V> {
    fn get(&self) -> V {
        return self.value.clone();
    }

    fn data_snapshot(&self) -> DataSnapshot<V> {
        return DataSnapshot {
            serial: NULL_SERIAL,
            value: self.value.clone(),
        };
    }
}

// =============================================================================
// Volatile
// =============================================================================

/// A settable value. Writing an equal value does not bump the version.
#[derive(Debug)]
pub struct VolatileCell<V> {
    version: VolatileVersion,
    data: RefCell<DataSnapshot<V>>,
}

impl<V: Clone + PartialEq + 'static> VolatileCell<V> {
    pub fn new(value: V) -> Rc<VolatileCell<V>> {
        return VolatileCell::new_in(&Clock::current(), value);
    }

    pub fn new_in(clock: &Clock, value: V) -> Rc<VolatileCell<V>> {
        let version = VolatileVersion::new_in(clock);
        let serial = version.version_serial();
        return Rc::new(VolatileCell {
            version,
            data: RefCell::new(DataSnapshot { serial, value }),
        });
    }

    /// Store `value`; returns whether anything changed.
    pub fn set_value(&self, value: V) -> bool {
        if self.data.borrow().value == value {
            return false;
        }
        self.version.next_version();
        let serial = self.version.version_serial();
        return freshen(&self.data, DataSnapshot { serial, value });
    }
}

impl<V: Clone + PartialEq + 'static> Version for VolatileCell<V> {
    #[inline]
    fn version_serial(&self) -> Serial {
        return self.version.version_serial();
    }

    fn is_stale(&self) -> bool {
        return false;
    }

    fn is_mutable(&self) -> bool {
        return true;
    }

    fn dependencies(&self) -> Vec<VersionRef> {
        return Vec::new();
    }

    fn next_version(&self) {
        self.version.next_version();
    }
}

impl<V: Clone + PartialEq + 'static> Versioned<V> for VolatileCell<V> {
    fn get(&self) -> V {
        return self.data.borrow().value.clone();
    }

    fn data_snapshot(&self) -> DataSnapshot<V> {
        return self.data.borrow().clone();
    }

    fn set(&self, value: V) -> Result<()> {
        self.set_value(value);
        return Ok(());
    }

    fn is_settable(&self) -> bool {
        return true;
    }
}

// =============================================================================
// Computed
// =============================================================================

/// Recomputes from a closure with no tracked dependencies when told to.
pub struct ComputedCell<V> {
    name: String,
    version: VolatileVersion,
    data: RefCell<DataSnapshot<V>>,
    compute: Compute<V>,
    guard: Reentrancy,
}

impl<V: Clone + 'static> ComputedCell<V> {
    pub fn new(name: &str, compute: impl Fn() -> V + 'static) -> Rc<ComputedCell<V>> {
        return ComputedCell::new_in(&Clock::current(), name, compute);
    }

    pub fn new_in(clock: &Clock, name: &str, compute: impl Fn() -> V + 'static) -> Rc<ComputedCell<V>> {
        let version = VolatileVersion::new_in(clock);
        let value = compute();
        let serial = version.version_serial();
        return Rc::new(ComputedCell {
            name: name.to_string(),
            version,
            data: RefCell::new(DataSnapshot { serial, value }),
            compute: Box::new(compute),
            guard: Reentrancy::new(),
        });
    }

    /// Re-run the closure under a fresh serial.
    ///
    /// A closure that calls back into `update` of the same cell is a wiring
    /// error and fails with [`Error::RecursiveCompute`].
    pub fn update(&self) -> Result<()> {
        let Some(_token) = self.guard.enter() else {
            return Err(Error::RecursiveCompute(self.name.clone()));
        };
        let clock = self.version.clock().clone();
        clock.grouped_compute(|| {
            self.version.next_version();
            let value = (self.compute)();
            let serial = self.version.version_serial();
            freshen(&self.data, DataSnapshot { serial, value });
        });
        return Ok(());
    }
}

impl<V: Clone + 'static> Version for ComputedCell<V> {
    fn version_serial(&self) -> Serial {
        return self.version.version_serial();
    }

    fn is_stale(&self) -> bool {
        return false;
    }

    fn is_mutable(&self) -> bool {
        return true;
    }

    fn dependencies(&self) -> Vec<VersionRef> {
        return Vec::new();
    }

    fn next_version(&self) {
        self.version.next_version();
    }
}

impl<V: Clone + 'static> Versioned<V> for ComputedCell<V> {
    fn get(&self) -> V {
        return self.data.borrow().value.clone();
    }

    fn data_snapshot(&self) -> DataSnapshot<V> {
        return self.data.borrow().clone();
    }
}

// =============================================================================
// Dependent
// =============================================================================

/// A memoized function over a list of versions, recomputed lazily.
///
/// The value's serial is the newest dependency serial seen when it was
/// computed. Reading the cell from inside its own computation returns the
/// previous value.
pub struct DependentCell<V> {
    version: DependentVersion,
    data: RefCell<DataSnapshot<V>>,
    compute: Compute<V>,
    guard: Reentrancy,
}

impl<V: Clone + 'static> DependentCell<V> {
    pub fn new(deps: Vec<VersionRef>, compute: impl Fn() -> V + 'static) -> Rc<DependentCell<V>> {
        return DependentCell::new_in(&Clock::current(), deps, compute);
    }

    pub fn new_in(clock: &Clock, deps: Vec<VersionRef>, compute: impl Fn() -> V + 'static) -> Rc<DependentCell<V>> {
        return Rc::new(DependentCell::build(clock, deps, Box::new(compute)));
    }

    /// A dependent cell mirroring another cell's value.
    pub fn mirror(dep: &Shared<V>) -> Rc<DependentCell<V>> {
        let source = Rc::clone(dep);
        return DependentCell::new(versions_of(std::slice::from_ref(dep)), move || source.get());
    }

    fn build(clock: &Clock, deps: Vec<VersionRef>, compute: Compute<V>) -> DependentCell<V> {
        let version = DependentVersion::unevaluated(clock, deps);
        let (serial, value) = clock.grouped_update(|| {
            version.refresh();
            return (version.snapshot().deps_serial, compute());
        });
        return DependentCell {
            version,
            data: RefCell::new(DataSnapshot { serial, value }),
            compute,
            guard: Reentrancy::new(),
        };
    }

    fn recompute(&self) {
        let Some(_token) = self.guard.enter() else {
            return;
        };
        let clock = self.version.clock().clone();
        clock.grouped_update(|| {
            self.version.refresh();
            let serial = self.version.snapshot().deps_serial;
            let value = (self.compute)();
            trace!("dependent data recomputed at serial {}", serial);
            freshen(&self.data, DataSnapshot { serial, value });
        });
    }
}

impl<V: Clone + 'static> Version for DependentCell<V> {
    fn version_serial(&self) -> Serial {
        return self.version.version_serial();
    }

    fn is_stale(&self) -> bool {
        if self.guard.is_active() {
            return false;
        }
        return self.version.is_stale_raw();
    }

    fn is_mutable(&self) -> bool {
        return self.version.is_mutable();
    }

    fn dependencies(&self) -> Vec<VersionRef> {
        return self.version.dependencies();
    }

    fn next_version(&self) {
        if !self.guard.is_active() && self.version.is_stale_raw() {
            self.recompute();
        }
    }
}

impl<V: Clone + 'static> Versioned<V> for DependentCell<V> {
    fn get(&self) -> V {
        self.next_version();
        return self.data.borrow().value.clone();
    }

    fn data_snapshot(&self) -> DataSnapshot<V> {
        return self.data.borrow().clone();
    }
}

// =============================================================================
// Iterable
// =============================================================================

/// A combinator over a list of same-typed cells.
///
/// Unlike [`DependentCell`] it refreshes itself whenever its serial or
/// staleness is read, so it never reports itself stale.
pub struct IterableCell<V> {
    inner: DependentCell<V>,
}

impl<V: Clone + 'static> IterableCell<V> {
    pub fn new(deps: Vec<Shared<V>>, compute: impl Fn(&[V]) -> V + 'static) -> Rc<IterableCell<V>> {
        return IterableCell::new_in(&Clock::current(), deps, compute);
    }

    pub fn new_in(clock: &Clock, deps: Vec<Shared<V>>, compute: impl Fn(&[V]) -> V + 'static) -> Rc<IterableCell<V>> {
        let versions = versions_of(&deps);
        let combine = move || {
            let values: Vec<V> = deps.iter().map(|dep| dep.get()).collect();
            return compute(&values);
        };
        return Rc::new(IterableCell {
            inner: DependentCell::build(clock, versions, Box::new(combine)),
        });
    }
}

impl<V: Clone + 'static> Version for IterableCell<V> {
    fn version_serial(&self) -> Serial {
        self.inner.next_version();
        return self.inner.version_serial();
    }

    fn is_stale(&self) -> bool {
        self.inner.next_version();
        return false;
    }

    fn is_mutable(&self) -> bool {
        return self.inner.is_mutable();
    }

    fn dependencies(&self) -> Vec<VersionRef> {
        return self.inner.dependencies();
    }

    fn next_version(&self) {
        self.inner.next_version();
    }
}

impl<V: Clone + 'static> Versioned<V> for IterableCell<V> {
    fn get(&self) -> V {
        return self.inner.get();
    }

    fn data_snapshot(&self) -> DataSnapshot<V> {
        self.inner.next_version();
        return self.inner.data_snapshot();
    }
}

// =============================================================================
// Latest
// =============================================================================

/// Takes the value of whichever dependency carries the newest serial.
///
/// Ties go to the earlier dependency. The optional callback runs every time
/// the selection is refreshed.
pub struct LatestCell<V> {
    version: DependentVersion,
    deps: Vec<Shared<V>>,
    data: RefCell<DataSnapshot<V>>,
    on_change: Option<Box<dyn Fn()>>,
    guard: Reentrancy,
}

fn latest_of<V: 'static>(deps: &[Shared<V>]) -> Option<DataSnapshot<V>> {
    let mut latest: Option<DataSnapshot<V>> = None;
    for dep in deps {
        let snapshot = dep.data_snapshot();
        let newer = match &latest {
            Some(current) => current.serial < snapshot.serial,
            None => true,
        };
        if newer {
            latest = Some(snapshot);
        }
    }
    return latest;
}

impl<V: Clone + 'static> LatestCell<V> {
    pub fn new(deps: Vec<Shared<V>>) -> Result<Rc<LatestCell<V>>> {
        return LatestCell::new_in(&Clock::current(), deps, None);
    }

    pub fn with_callback(deps: Vec<Shared<V>>, on_change: impl Fn() + 'static) -> Result<Rc<LatestCell<V>>> {
        return LatestCell::new_in(&Clock::current(), deps, Some(Box::new(on_change)));
    }

    pub fn new_in(clock: &Clock, deps: Vec<Shared<V>>, on_change: Option<Box<dyn Fn()>>) -> Result<Rc<LatestCell<V>>> {
        let version = DependentVersion::unevaluated(clock, versions_of(&deps));
        let initial = clock.grouped_update(|| {
            version.refresh();
            return latest_of(&deps);
        });
        let Some(initial) = initial else {
            return Err(Error::NoDependencies);
        };
        return Ok(Rc::new(LatestCell {
            version,
            deps,
            data: RefCell::new(initial),
            on_change,
            guard: Reentrancy::new(),
        }));
    }

    fn fresh(&self) {
        if self.guard.is_active() || !self.version.is_stale_raw() {
            return;
        }
        let Some(_token) = self.guard.enter() else {
            return;
        };
        let clock = self.version.clock().clone();
        clock.grouped_update(|| {
            self.version.refresh();
            let Some(latest) = latest_of(&self.deps) else {
                return;
            };
            if freshen(&self.data, latest) {
                if let Some(on_change) = &self.on_change {
                    on_change();
                }
            }
        });
    }
}

impl<V: Clone + 'static> Version for LatestCell<V> {
    fn version_serial(&self) -> Serial {
        self.fresh();
        return self.version.version_serial();
    }

    fn is_stale(&self) -> bool {
        self.fresh();
        return false;
    }

    fn is_mutable(&self) -> bool {
        return self.version.is_mutable();
    }

    fn dependencies(&self) -> Vec<VersionRef> {
        return self.version.dependencies();
    }

    fn next_version(&self) {
        self.fresh();
    }
}

impl<V: Clone + 'static> Versioned<V> for LatestCell<V> {
    fn get(&self) -> V {
        self.fresh();
        return self.data.borrow().value.clone();
    }

    fn data_snapshot(&self) -> DataSnapshot<V> {
        self.fresh();
        return self.data.borrow().clone();
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// A frozen copy of another cell as it was at creation.
#[derive(Debug)]
pub struct SnapshotCell<V> {
    serial: Serial,
    value: V,
}

impl<V: Clone + 'static> SnapshotCell<V> {
    pub fn new(dep: &Shared<V>) -> Rc<SnapshotCell<V>> {
        refresh(dep.as_ref());
        let value = dep.get();
        return Rc::new(SnapshotCell {
            serial: dep.version_serial(),
            value,
        });
    }
}

impl<V: Clone + 'static> Version for SnapshotCell<V> {
    fn version_serial(&self) -> Serial {
        return self.serial;
    }

    fn is_stale(&self) -> bool {
        return false;
    }

    fn is_mutable(&self) -> bool {
        return false;
    }

    fn dependencies(&self) -> Vec<VersionRef> {
        return Vec::new();
    }

    fn next_version(&self) {}
}

impl<V: Clone + 'static> Versioned<V> for SnapshotCell<V> {
    fn get(&self) -> V {
        return self.value.clone();
    }

    fn data_snapshot(&self) -> DataSnapshot<V> {
        return DataSnapshot {
            serial: self.serial,
            value: self.value.clone(),
        };
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::version::{version_of, AsVersion};

    #[test]
    fn test_immutable() {
        let cell = ImmutableCell::new(5);
        assert_eq!(cell.get(), 5);
        assert_eq!(cell.version_serial(), NULL_SERIAL);
        assert!(!cell.is_mutable());
        assert!(cell.set(6).is_err());
    }

    #[test]
    fn test_volatile_equality_gate() {
        let clock = Clock::new();
        let cell = VolatileCell::new_in(&clock, 1);
        let serial = cell.version_serial();

        assert!(!cell.set_value(1));
        assert_eq!(cell.version_serial(), serial);

        assert!(cell.set_value(2));
        assert!(cell.version_serial() > serial);
        assert_eq!(cell.get(), 2);
        assert_eq!(cell.data_snapshot().serial, cell.version_serial());
    }

    #[test]
    fn test_computed_update() {
        let clock = Clock::new();
        let counter = Rc::new(Cell::new(0));
        let source = counter.clone();
        let cell = ComputedCell::new_in(&clock, "counter", move || {
            source.set(source.get() + 1);
            source.get()
        });
        assert_eq!(cell.get(), 1);
        let serial = cell.version_serial();

        cell.update().unwrap();
        assert_eq!(cell.get(), 2);
        assert!(cell.version_serial() > serial);
    }

    #[test]
    fn test_computed_recursive_update_is_an_error() {
        let clock = Clock::new();
        let slot: Rc<RefCell<Option<Rc<ComputedCell<i32>>>>> = Rc::new(RefCell::new(None));
        let inner = slot.clone();
        let outcome = Rc::new(RefCell::new(None));
        let seen = outcome.clone();
        let cell = ComputedCell::new_in(&clock, "loop", move || {
            if let Some(cell) = inner.borrow().as_ref() {
                *seen.borrow_mut() = Some(cell.update());
            }
            0
        });
        *slot.borrow_mut() = Some(cell.clone());

        cell.update().unwrap();
        assert_eq!(
            *outcome.borrow(),
            Some(Err(Error::RecursiveCompute("loop".to_string())))
        );
    }

    #[test]
    fn test_dependent_is_lazy_and_memoized() {
        let clock = Clock::new();
        let v1 = VolatileCell::new_in(&clock, 1);
        let v2 = VolatileCell::new_in(&clock, 20);
        let calls = Rc::new(Cell::new(0));

        let (a, b, counter) = (v1.clone(), v2.clone(), calls.clone());
        let sum = DependentCell::new_in(&clock, vec![v1.clone().as_version(), v2.clone().as_version()], move || {
            counter.set(counter.get() + 1);
            a.get() + b.get()
        });

        assert_eq!(sum.get(), 21);
        assert_eq!(sum.get(), 21);
        assert_eq!(calls.get(), 1);
        assert_eq!(sum.version_serial(), v2.version_serial());

        v1.set_value(5);
        assert!(sum.is_stale());
        assert_eq!(calls.get(), 1);
        assert_eq!(sum.get(), 25);
        assert_eq!(calls.get(), 2);
        assert_eq!(sum.version_serial(), v1.version_serial());
        assert!(!sum.is_stale());
    }

    #[test]
    fn test_dependent_chain() {
        let clock = Clock::new();
        let v1 = VolatileCell::new_in(&clock, 2);
        let source = v1.clone();
        let doubled = DependentCell::new_in(&clock, vec![v1.clone().as_version()], move || source.get() * 2);
        let outer = doubled.clone();
        let plus_one = DependentCell::new_in(&clock, vec![doubled.clone().as_version()], move || outer.get() + 1);

        assert_eq!(plus_one.get(), 5);
        v1.set_value(10);
        assert_eq!(plus_one.get(), 21);
        assert_eq!(doubled.get(), 20);
    }

    #[test]
    fn test_iterable_sum() {
        let clock = Clock::new();
        let cells: Vec<Rc<VolatileCell<i32>>> = (1..=3).map(|v| VolatileCell::new_in(&clock, v)).collect();
        let deps: Vec<Shared<i32>> = cells.iter().map(|c| c.clone() as Shared<i32>).collect();
        let sum = IterableCell::new_in(&clock, deps, |values| values.iter().sum());

        assert_eq!(sum.get(), 6);
        cells[1].set_value(10);
        assert!(!sum.is_stale());
        assert_eq!(sum.version_serial(), cells[1].version_serial());
        assert_eq!(sum.get(), 14);
    }

    #[test]
    fn test_latest_picks_newest() {
        let clock = Clock::new();
        let v1 = VolatileCell::new_in(&clock, "one");
        let v2 = VolatileCell::new_in(&clock, "two");
        let changes = Rc::new(Cell::new(0));
        let counter = changes.clone();
        let latest = LatestCell::new_in(
            &clock,
            vec![v1.clone() as Shared<&str>, v2.clone() as Shared<&str>],
            Some(Box::new(move || counter.set(counter.get() + 1))),
        )
        .unwrap();

        assert_eq!(latest.get(), "two");
        v1.set_value("uno");
        assert_eq!(latest.get(), "uno");
        assert_eq!(changes.get(), 1);
        v2.set_value("dos");
        assert_eq!(latest.get(), "dos");
    }

    #[test]
    fn test_latest_requires_dependencies() {
        let result = LatestCell::<i32>::new(Vec::new());
        assert!(matches!(result, Err(Error::NoDependencies)));
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let clock = Clock::new();
        let v1 = VolatileCell::new_in(&clock, 7);
        let shared: Shared<i32> = v1.clone();
        let frozen = SnapshotCell::new(&shared);
        v1.set_value(8);
        assert_eq!(frozen.get(), 7);
        assert!(!frozen.is_stale());
        assert!(frozen.version_serial() < v1.version_serial());
        assert!(version_of(&shared).version_serial() > frozen.version_serial());
    }

    #[test]
    fn test_grouped_mutations_share_a_serial() {
        let clock = Clock::new();
        let v1 = VolatileCell::new_in(&clock, 0);
        let v2 = VolatileCell::new_in(&clock, 0);
        clock.grouped_update(|| {
            v1.set_value(1);
            v2.set_value(2);
        });
        assert_eq!(v1.version_serial(), v2.version_serial());
    }
}

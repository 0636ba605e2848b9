//! Versioned dependency graph.
//!
//! Every node in the graph exposes a [`Version`]: a serial drawn from a
//! shared [`Clock`], a staleness check, and the list of versions it depends
//! on. Cells built on top of that ([`VolatileCell`], [`DependentCell`],
//! [`Alias`], ...) memoize their value together with the serial it was
//! computed at, and recompute lazily when pulled after a dependency moved.
//!
//! # Grouped updates
//!
//! Mutations inside [`Clock::grouped_update`] all observe one frozen serial,
//! so any number of edits produce a single observable version bump. Nesting
//! is allowed; only the outermost group advances the clock.
//!
//! # Complexity
//!
//! - `is_stale`: O(d) for d direct dependencies (recurses only into stale ones)
//! - `next_version` on a dependent: O(d) plus the cost of the compute function

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use log::warn;

mod alias;
mod cell;
mod guard;
mod property;
pub mod scope;

pub use alias::Alias;
pub use cell::{
    ComputedCell, DependentCell, ImmutableCell, IterableCell, LatestCell, SnapshotCell,
    VolatileCell,
};
pub use guard::{Reentrancy, ReentrancyToken};
pub use property::{Property, PropertyArray};

use crate::error::{Error, Result};

/// A point in the clock's mutation history.
pub type Serial = i32;

/// Serial of data that never changes.
pub const NULL_SERIAL: Serial = i32::MIN;
/// Serial marking a snapshot that has never been computed.
pub const STALE_SERIAL: Serial = i32::MIN + 1;
/// Smallest serial the clock hands out.
pub const MIN_SERIAL: Serial = i32::MIN + 2;
/// Largest serial the clock hands out before rolling over.
pub const MAX_SERIAL: Serial = i32::MAX - 1;
/// Serial newer than anything the clock can produce.
pub const FRESH_SERIAL: Serial = i32::MAX;

/// Anything stamped with a serial, so snapshots can be merged monotonically.
pub trait SerialHolder {
    fn serial(&self) -> Serial;
}

/// When a dependent version was last evaluated and the newest dependency
/// serial it saw at that point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionSnapshot {
    pub snapshot_serial: Serial,
    pub deps_serial: Serial,
}

impl VersionSnapshot {
    pub const IMMUTABLE: VersionSnapshot = VersionSnapshot {
        snapshot_serial: FRESH_SERIAL,
        deps_serial: NULL_SERIAL,
    };

    pub const STALE: VersionSnapshot = VersionSnapshot {
        snapshot_serial: NULL_SERIAL,
        deps_serial: STALE_SERIAL,
    };
}

impl SerialHolder for VersionSnapshot {
    #[inline]
    fn serial(&self) -> Serial {
        return self.snapshot_serial;
    }
}

/// A value together with the serial it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSnapshot<V> {
    pub serial: Serial,
    pub value: V,
}

impl<V> SerialHolder for DataSnapshot<V> {
    #[inline]
    fn serial(&self) -> Serial {
        return self.serial;
    }
}

/// Replace the stored snapshot if the new one is at least as recent.
///
/// Returns `true` when the slot was updated. Equal serials replace, so the
/// last write inside one grouped update wins.
pub fn freshen<S: SerialHolder>(slot: &RefCell<S>, snapshot: S) -> bool {
    let mut stored = slot.borrow_mut();
    if stored.serial() <= snapshot.serial() {
        *stored = snapshot;
        return true;
    }
    return false;
}

// =============================================================================
// Clock
// =============================================================================

#[derive(Debug)]
struct ClockState {
    serial: Cell<Serial>,
    frozen: Cell<Serial>,
    nesting: Cell<u32>,
}

/// Monotonic serial source shared by every node of one graph.
///
/// `Clock` is a cheap handle; clones share state. [`Clock::current`] is the
/// thread's default clock, [`Clock::new`] creates an isolated one.
#[derive(Clone)]
pub struct Clock {
    state: Rc<ClockState>,
}

thread_local! {
    static CURRENT: Clock = Clock::new();
}

/// Leaves the group when dropped, so a panicking block does not leave the
/// clock frozen.
struct GroupToken<'a> {
    clock: &'a Clock,
}

impl Drop for GroupToken<'_> {
    fn drop(&mut self) {
        let nesting = &self.clock.state.nesting;
        nesting.set(nesting.get() - 1);
    }
}

impl Clock {
    pub fn new() -> Clock {
        return Clock {
            state: Rc::new(ClockState {
                serial: Cell::new(MIN_SERIAL - 1),
                frozen: Cell::new(0),
                nesting: Cell::new(0),
            }),
        };
    }

    /// The default clock of the calling thread.
    pub fn current() -> Clock {
        return CURRENT.with(Clock::clone);
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Clock) -> bool {
        return Rc::ptr_eq(&self.state, &other.state);
    }

    #[inline]
    pub fn is_grouped(&self) -> bool {
        return self.state.nesting.get() > 0;
    }

    /// The serial observers compare against: frozen inside a group.
    pub fn current_version(&self) -> Serial {
        if self.is_grouped() {
            return self.state.frozen.get();
        }
        return self.state.serial.get();
    }

    /// A fresh serial, or the frozen one inside a group.
    pub fn next_version(&self) -> Serial {
        if self.is_grouped() {
            return self.state.frozen.get();
        }
        return self.next_raw();
    }

    /// Serials saturate at `MAX_SERIAL` rather than wrap, so they never
    /// go backwards.
    fn next_raw(&self) -> Serial {
        let serial = &self.state.serial;
        if serial.get() < MAX_SERIAL {
            serial.set(serial.get() + 1);
            if serial.get() == MAX_SERIAL {
                warn!("version clock reached its last serial");
            }
        }
        return serial.get();
    }

    fn enter_group(&self) -> GroupToken<'_> {
        let nesting = self.state.nesting.get();
        if nesting == 0 {
            let frozen = self.next_raw();
            self.state.frozen.set(frozen);
        }
        self.state.nesting.set(nesting + 1);
        return GroupToken { clock: self };
    }

    /// Run `block` with the clock frozen; nested calls share the outer serial.
    pub fn grouped_update<R>(&self, block: impl FnOnce() -> R) -> R {
        let _group = self.enter_group();
        return block();
    }

    /// Same as [`Clock::grouped_update`], named for read-side evaluation.
    pub fn grouped_compute<R>(&self, block: impl FnOnce() -> R) -> R {
        let _group = self.enter_group();
        return block();
    }

    /// Whether a snapshot taken at `snapshot` over `deps` must be recomputed.
    pub fn is_stale(&self, deps: &[VersionRef], snapshot: Serial, deps_serial: Serial) -> bool {
        return self.grouped_compute(|| {
            if snapshot >= self.current_version() {
                return false;
            }
            if snapshot < deps_serial {
                return true;
            }
            for dep in deps {
                if dep.is_stale() || snapshot < dep.version_serial() {
                    return true;
                }
            }
            return false;
        });
    }

    /// Bring stale dependencies up to date and record the newest serial.
    pub fn compute_version_snapshot(&self, deps: &[VersionRef]) -> VersionSnapshot {
        return self.grouped_compute(|| {
            let mut deps_serial = NULL_SERIAL;
            for dep in deps {
                if dep.is_stale() {
                    dep.next_version();
                }
                deps_serial = deps_serial.max(dep.version_serial());
            }
            return VersionSnapshot {
                snapshot_serial: self.current_version(),
                deps_serial,
            };
        });
    }

    pub fn is_mutable(deps: &[VersionRef]) -> bool {
        return deps.iter().any(|dep| dep.is_mutable());
    }
}

impl Default for Clock {
    fn default() -> Clock {
        return Clock::new();
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f
            .debug_struct("Clock")
            .field("serial", &self.state.serial.get())
            .field("nesting", &self.state.nesting.get())
            .finish();
    }
}

// =============================================================================
// Version capability
// =============================================================================

/// The version capability every cell and rope node exposes.
pub trait Version {
    fn version_serial(&self) -> Serial;
    /// True if the node needs `next_version` to reflect its dependencies.
    fn is_stale(&self) -> bool;
    fn is_mutable(&self) -> bool;
    fn dependencies(&self) -> Vec<VersionRef>;
    /// Bring the node up to date (or bump it, for volatile versions).
    fn next_version(&self);
}

pub type VersionRef = Rc<dyn Version>;

/// Upcast from any versioned node to a plain [`VersionRef`].
pub trait AsVersion {
    fn as_version(self: Rc<Self>) -> VersionRef;
}

impl<T: Version + 'static> AsVersion for T {
    fn as_version(self: Rc<Self>) -> VersionRef {
        return self;
    }
}

/// Pull a version up to date without bumping volatile ones.
#[inline]
pub fn refresh<T: Version + ?Sized>(version: &T) {
    if version.is_stale() {
        version.next_version();
    }
}

/// A memoized value exposing its version.
pub trait Versioned<V>: Version + AsVersion {
    /// The current value, recomputing if a dependency moved.
    fn get(&self) -> V;

    /// The value with the serial it was produced at, without pulling.
    fn data_snapshot(&self) -> DataSnapshot<V>;

    fn set(&self, _value: V) -> Result<()> {
        return Err(Error::NotSettable);
    }

    fn is_settable(&self) -> bool {
        return false;
    }

    /// The cell an alias currently forwards to; `None` for concrete cells.
    fn alias_target(&self) -> Option<Shared<V>> {
        return None;
    }
}

pub type Shared<V> = Rc<dyn Versioned<V>>;

/// The version handle of a shared cell.
#[inline]
pub fn version_of<V: 'static>(cell: &Shared<V>) -> VersionRef {
    return Rc::clone(cell).as_version();
}

/// Version handles of a list of shared cells.
pub fn versions_of<V: 'static>(cells: &[Shared<V>]) -> Vec<VersionRef> {
    return cells.iter().map(version_of).collect();
}

// =============================================================================
// Bare versions
// =============================================================================

/// Never changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmutableVersion;

impl Version for ImmutableVersion {
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

/// A version bumped explicitly by its owner.
#[derive(Debug)]
pub struct VolatileVersion {
    clock: Clock,
    serial: Cell<Serial>,
}

impl VolatileVersion {
    pub fn new() -> VolatileVersion {
        return VolatileVersion::new_in(&Clock::current());
    }

    pub fn new_in(clock: &Clock) -> VolatileVersion {
        return VolatileVersion {
            clock: clock.clone(),
            serial: Cell::new(clock.next_version()),
        };
    }

    pub fn clock(&self) -> &Clock {
        return &self.clock;
    }
}

impl Default for VolatileVersion {
    fn default() -> VolatileVersion {
        return VolatileVersion::new();
    }
}

impl Version for VolatileVersion {
    #[inline]
    fn version_serial(&self) -> Serial {
        return self.serial.get();
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
        self.serial.set(self.clock.next_version());
    }
}

/// A version derived from its dependencies, refreshed on `next_version`.
///
/// Its serial is the newest dependency serial seen at the last refresh.
pub struct DependentVersion {
    clock: Clock,
    deps: Vec<VersionRef>,
    snapshot: RefCell<VersionSnapshot>,
    mutable: Cell<Option<bool>>,
}

impl DependentVersion {
    pub fn new(deps: Vec<VersionRef>) -> DependentVersion {
        return DependentVersion::new_in(&Clock::current(), deps);
    }

    pub fn new_in(clock: &Clock, deps: Vec<VersionRef>) -> DependentVersion {
        let version = DependentVersion::unevaluated(clock, deps);
        version.refresh();
        return version;
    }

    /// A version that has not looked at its dependencies yet.
    pub(crate) fn unevaluated(clock: &Clock, deps: Vec<VersionRef>) -> DependentVersion {
        return DependentVersion {
            clock: clock.clone(),
            deps,
            snapshot: RefCell::new(VersionSnapshot::STALE),
            mutable: Cell::new(None),
        };
    }

    pub fn clock(&self) -> &Clock {
        return &self.clock;
    }

    #[inline]
    pub fn snapshot(&self) -> VersionSnapshot {
        return *self.snapshot.borrow();
    }

    #[inline]
    pub fn is_stale_raw(&self) -> bool {
        let snapshot = self.snapshot();
        return self
            .clock
            .is_stale(&self.deps, snapshot.snapshot_serial, snapshot.deps_serial);
    }

    /// Recompute the snapshot unconditionally.
    pub fn refresh(&self) -> bool {
        let snapshot = self.clock.compute_version_snapshot(&self.deps);
        return freshen(&self.snapshot, snapshot);
    }

    pub fn deps(&self) -> &[VersionRef] {
        return &self.deps;
    }
}

impl Version for DependentVersion {
    fn version_serial(&self) -> Serial {
        return self.snapshot().deps_serial;
    }

    fn is_stale(&self) -> bool {
        return self.is_stale_raw();
    }

    fn is_mutable(&self) -> bool {
        if let Some(mutable) = self.mutable.get() {
            return mutable;
        }
        let mutable = Clock::is_mutable(&self.deps);
        self.mutable.set(Some(mutable));
        return mutable;
    }

    fn dependencies(&self) -> Vec<VersionRef> {
        return self.deps.clone();
    }

    fn next_version(&self) {
        if self.is_stale_raw() {
            self.refresh();
        }
    }
}

/// A dependent version that refreshes itself whenever it is read.
pub struct UpdatingVersion {
    inner: DependentVersion,
}

impl UpdatingVersion {
    pub fn new(deps: Vec<VersionRef>) -> UpdatingVersion {
        return UpdatingVersion::new_in(&Clock::current(), deps);
    }

    pub fn new_in(clock: &Clock, deps: Vec<VersionRef>) -> UpdatingVersion {
        return UpdatingVersion {
            inner: DependentVersion::new_in(clock, deps),
        };
    }

    pub fn fresh_snapshot(&self) -> VersionSnapshot {
        self.inner.next_version();
        return self.inner.snapshot();
    }
}

impl Version for UpdatingVersion {
    fn version_serial(&self) -> Serial {
        return self.fresh_snapshot().deps_serial;
    }

    fn is_stale(&self) -> bool {
        self.fresh_snapshot();
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

/// The version of its dependencies as they were at creation; never moves.
pub struct SnapshotVersion {
    inner: DependentVersion,
}

impl SnapshotVersion {
    pub fn new(deps: Vec<VersionRef>) -> SnapshotVersion {
        return SnapshotVersion::new_in(&Clock::current(), deps);
    }

    pub fn new_in(clock: &Clock, deps: Vec<VersionRef>) -> SnapshotVersion {
        return SnapshotVersion {
            inner: DependentVersion::new_in(clock, deps),
        };
    }
}

impl Version for SnapshotVersion {
    fn version_serial(&self) -> Serial {
        return self.inner.snapshot().deps_serial;
    }

    fn is_stale(&self) -> bool {
        return false;
    }

    fn is_mutable(&self) -> bool {
        return false;
    }

    fn dependencies(&self) -> Vec<VersionRef> {
        return self.inner.dependencies();
    }

    fn next_version(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = Clock::new();
        let a = clock.next_version();
        let b = clock.next_version();
        assert!(b > a);
        assert_eq!(clock.current_version(), b);
    }

    #[test]
    fn test_grouped_update_freezes_serial() {
        let clock = Clock::new();
        let (a, b, c) = clock.grouped_update(|| {
            let a = clock.next_version();
            let b = clock.next_version();
            let c = clock.grouped_update(|| clock.next_version());
            (a, b, c)
        });
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert!(!clock.is_grouped());
        assert!(clock.next_version() > a);
    }

    #[test]
    fn test_group_released_on_panic() {
        let clock = Clock::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            clock.grouped_update(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(!clock.is_grouped());
    }

    #[test]
    fn test_serial_saturates() {
        let clock = Clock::new();
        clock.state.serial.set(MAX_SERIAL - 1);
        assert_eq!(clock.next_version(), MAX_SERIAL);
        assert_eq!(clock.next_version(), MAX_SERIAL);
        assert_eq!(clock.grouped_update(|| clock.next_version()), MAX_SERIAL);
    }

    #[test]
    fn test_freshen_keeps_newest() {
        let slot = RefCell::new(DataSnapshot { serial: 5, value: "five" });
        assert!(!freshen(&slot, DataSnapshot { serial: 4, value: "four" }));
        assert_eq!(slot.borrow().value, "five");
        assert!(freshen(&slot, DataSnapshot { serial: 5, value: "again" }));
        assert_eq!(slot.borrow().value, "again");
        assert!(freshen(&slot, DataSnapshot { serial: 9, value: "nine" }));
        assert_eq!(slot.borrow().serial, 9);
    }

    #[test]
    fn test_immutable_version() {
        let version = ImmutableVersion;
        assert_eq!(version.version_serial(), NULL_SERIAL);
        assert!(!version.is_stale());
        assert!(!version.is_mutable());
    }

    #[test]
    fn test_dependent_version_tracks_volatile() {
        let clock = Clock::new();
        let v1: VersionRef = Rc::new(VolatileVersion::new_in(&clock));
        let v2: VersionRef = Rc::new(VolatileVersion::new_in(&clock));
        let dependent = DependentVersion::new_in(&clock, vec![v1.clone(), v2.clone()]);

        assert!(!dependent.is_stale());
        assert_eq!(dependent.version_serial(), v2.version_serial());
        assert!(dependent.is_mutable());

        v1.next_version();
        assert!(dependent.is_stale());
        dependent.next_version();
        assert!(!dependent.is_stale());
        assert_eq!(dependent.version_serial(), v1.version_serial());
    }

    #[test]
    fn test_updating_and_snapshot_versions() {
        let clock = Clock::new();
        let v1: VersionRef = Rc::new(VolatileVersion::new_in(&clock));
        let updating = UpdatingVersion::new_in(&clock, vec![v1.clone()]);
        let frozen = SnapshotVersion::new_in(&clock, vec![v1.clone()]);
        let before = frozen.version_serial();

        v1.next_version();
        assert!(!updating.is_stale());
        assert_eq!(updating.version_serial(), v1.version_serial());
        assert_eq!(frozen.version_serial(), before);
        assert!(!frozen.is_stale());
    }

    #[test]
    fn test_immutable_dependencies_are_not_mutable() {
        let clock = Clock::new();
        let dependent = DependentVersion::new_in(&clock, vec![Rc::new(ImmutableVersion)]);
        assert!(!dependent.is_mutable());
        assert!(!dependent.is_stale());
    }
}

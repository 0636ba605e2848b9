//! Rebindable indirection.
//!
//! An [`Alias`] forwards every read and write to a target cell. Rebinding
//! the target bumps the alias' own version, so dependents of the alias see
//! the switch even when the new target is older than the old one. Alias
//! cycles are tolerated: a read that comes back around to the same alias
//! returns the last snapshot it observed.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{
    refresh, Clock, DataSnapshot, Reentrancy, Serial, Shared, Version, VersionRef, Versioned,
};
use crate::error::{Error, Result};

pub struct Alias<V> {
    clock: Clock,
    version: Cell<Serial>,
    target: RefCell<Shared<V>>,
    last: RefCell<DataSnapshot<V>>,
    guard: Reentrancy,
}

/// Identity comparison of two shared cells.
#[inline]
pub fn same_cell<V: 'static>(a: &Shared<V>, b: &Shared<V>) -> bool {
    return Rc::as_ptr(a).cast::<()>() == Rc::as_ptr(b).cast::<()>();
}

impl<V: Clone + 'static> Alias<V> {
    pub fn new(target: Shared<V>) -> Rc<Alias<V>> {
        return Alias::new_in(&Clock::current(), target);
    }

    /// Create an alias. Passing another alias binds to that alias' target.
    pub fn new_in(clock: &Clock, target: Shared<V>) -> Rc<Alias<V>> {
        let target = match target.alias_target() {
            Some(inner) => inner,
            None => target,
        };
        let last = target.data_snapshot();
        return Rc::new(Alias {
            clock: clock.clone(),
            version: Cell::new(clock.next_version()),
            target: RefCell::new(target),
            last: RefCell::new(last),
            guard: Reentrancy::new(),
        });
    }

    #[inline]
    pub fn target(&self) -> Shared<V> {
        return Rc::clone(&self.target.borrow());
    }

    pub fn is_targeting(&self, cell: &Shared<V>) -> bool {
        return same_cell(&self.target.borrow(), cell);
    }

    /// Point the alias somewhere else.
    pub fn set_target(&self, target: Shared<V>) {
        *self.target.borrow_mut() = target;
        self.update_snapshot();
        self.touch();
    }

    /// Bump the alias' own version without changing its target.
    pub fn touch(&self) {
        self.version.set(self.clock.next_version());
    }

    fn update_snapshot(&self) {
        let target = self.target();
        let snapshot = target.data_snapshot();
        *self.last.borrow_mut() = snapshot;
    }

    fn last_serial(&self) -> Serial {
        return self.last.borrow().serial;
    }
}

impl<V: Clone + 'static> Version for Alias<V> {
    fn version_serial(&self) -> Serial {
        let Some(_token) = self.guard.enter() else {
            return self.version.get().max(self.last_serial());
        };
        let serial = self.target().version_serial();
        self.update_snapshot();
        return self.version.get().max(serial);
    }

    fn is_stale(&self) -> bool {
        let Some(_token) = self.guard.enter() else {
            return false;
        };
        let stale = self.target().is_stale();
        self.update_snapshot();
        return stale;
    }

    fn is_mutable(&self) -> bool {
        return true;
    }

    fn dependencies(&self) -> Vec<VersionRef> {
        let Some(_token) = self.guard.enter() else {
            return Vec::new();
        };
        return self.target().dependencies();
    }

    fn next_version(&self) {
        let Some(_token) = self.guard.enter() else {
            return;
        };
        refresh(self.target().as_ref());
        self.update_snapshot();
    }
}

impl<V: Clone + 'static> Versioned<V> for Alias<V> {
    fn get(&self) -> V {
        let Some(_token) = self.guard.enter() else {
            return self.last.borrow().value.clone();
        };
        let value = self.target().get();
        self.update_snapshot();
        return value;
    }

    fn data_snapshot(&self) -> DataSnapshot<V> {
        let Some(_token) = self.guard.enter() else {
            return self.last.borrow().clone();
        };
        self.update_snapshot();
        return self.last.borrow().clone();
    }

    fn set(&self, value: V) -> Result<()> {
        let Some(token) = self.guard.enter() else {
            return Err(Error::NotSettable);
        };
        self.target().set(value)?;
        drop(token);
        self.update_snapshot();
        return Ok(());
    }

    fn is_settable(&self) -> bool {
        let Some(_token) = self.guard.enter() else {
            return false;
        };
        return self.target().is_settable();
    }

    fn alias_target(&self) -> Option<Shared<V>> {
        return Some(self.target());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{AsVersion, DependentCell, ImmutableCell, VolatileCell};

    #[test]
    fn test_alias_forwards_and_rebinds() {
        let clock = Clock::new();
        let v1 = VolatileCell::new_in(&clock, 1);
        let v2 = VolatileCell::new_in(&clock, 20);
        let alias = Alias::new_in(&clock, v1.clone());

        assert_eq!(alias.get(), 1);
        alias.set(2).unwrap();
        assert_eq!(v1.get(), 2);
        assert!(alias.version_serial() >= v1.version_serial());

        let before = alias.version_serial();
        alias.set_target(v2.clone());
        assert_eq!(alias.get(), 20);
        assert!(alias.version_serial() > before);

        v2.set_value(30);
        assert_eq!(alias.get(), 30);
        assert_eq!(alias.version_serial(), v2.version_serial());
    }

    #[test]
    fn test_alias_of_alias_binds_to_target() {
        let clock = Clock::new();
        let v1 = VolatileCell::new_in(&clock, 1);
        let first = Alias::new_in(&clock, v1.clone());
        let second = Alias::new_in(&clock, first.clone());
        let expected: Shared<i32> = v1.clone();
        assert!(second.is_targeting(&expected));
    }

    #[test]
    fn test_dependent_sees_rebind() {
        let clock = Clock::new();
        let v1 = VolatileCell::new_in(&clock, 1);
        let v2 = VolatileCell::new_in(&clock, 2);
        let alias = Alias::new_in(&clock, v1.clone());
        let source = alias.clone();
        let doubled = DependentCell::new_in(&clock, vec![alias.clone().as_version()], move || source.get() * 2);

        assert_eq!(doubled.get(), 2);
        alias.set_target(v2.clone());
        assert_eq!(doubled.get(), 4);
        v1.set_value(100);
        assert_eq!(doubled.get(), 4);
    }

    #[test]
    fn test_alias_cycle_returns_last_snapshot() {
        let clock = Clock::new();
        let v1 = VolatileCell::new_in(&clock, 7);
        let a = Alias::new_in(&clock, v1.clone());
        let b = Alias::new_in(&clock, a.clone());
        a.set_target(b.clone());
        b.set_target(a.clone());

        assert_eq!(a.get(), 7);
        assert_eq!(b.get(), 7);
        assert!(!a.is_stale());
    }

    #[test]
    fn test_set_through_immutable_fails() {
        let clock = Clock::new();
        let alias = Alias::new_in(&clock, ImmutableCell::new(3));
        assert_eq!(alias.set(4), Err(Error::NotSettable));
        assert!(!alias.is_settable());
    }
}

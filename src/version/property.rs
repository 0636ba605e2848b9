//! Connectable properties and two-way aggregate arrays.
//!
//! A [`Property`] owns a local volatile value and an alias that normally
//! points at it. Connecting the property redirects the alias to another
//! cell; disconnecting copies the current value back into the local cell.
//!
//! A [`PropertyArray`] ties one aggregate property to N item properties:
//! writing the aggregate distributes it over the items, writing an item
//! re-aggregates. Both directions write inside one grouped update, so every
//! cell touched by a synchronization carries the same serial.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use log::warn;

use super::{
    refresh, Alias, Clock, DataSnapshot, Reentrancy, Serial, Shared, Version, VersionRef,
    Versioned, VolatileCell, NULL_SERIAL,
};
use crate::error::Result;

// =============================================================================
// Property
// =============================================================================

pub struct Property<V> {
    name: String,
    local: Rc<VolatileCell<V>>,
    alias: Rc<Alias<V>>,
    connected: Cell<bool>,
}

impl<V: Clone + PartialEq + 'static> Property<V> {
    pub fn new(name: &str, value: V) -> Rc<Property<V>> {
        return Property::new_in(&Clock::current(), name, value);
    }

    pub fn new_in(clock: &Clock, name: &str, value: V) -> Rc<Property<V>> {
        let local = VolatileCell::new_in(clock, value);
        let alias = Alias::new_in(clock, local.clone());
        return Rc::new(Property {
            name: name.to_string(),
            local,
            alias,
            connected: Cell::new(false),
        });
    }

    pub fn name(&self) -> &str {
        return &self.name;
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        return self.connected.get();
    }

    pub fn alias(&self) -> &Rc<Alias<V>> {
        return &self.alias;
    }

    /// Take the value from `target` until disconnected.
    pub fn connect(&self, target: Shared<V>) {
        self.alias.set_target(target);
        self.connected.set(true);
    }

    /// Revert to the local value, keeping whatever the connection held.
    pub fn disconnect(&self) {
        if !self.connected.get() {
            return;
        }
        let value = self.alias.get();
        self.local.set_value(value);
        self.alias.set_target(self.local.clone());
        self.connected.set(false);
    }

    /// Bind directly to the end of the alias chain, so later rebinding of
    /// intermediate aliases no longer affects this property.
    pub fn connection_finalized(&self) {
        let mut target = self.alias.target();
        let mut seen = vec![Rc::as_ptr(&target).cast::<()>()];
        while let Some(inner) = target.alias_target() {
            let ptr = Rc::as_ptr(&inner).cast::<()>();
            if seen.contains(&ptr) {
                break;
            }
            seen.push(ptr);
            target = inner;
        }
        if !self.alias.is_targeting(&target) {
            self.alias.set_target(target);
        }
    }
}

impl<V: Clone + PartialEq + 'static> Version for Property<V> {
    fn version_serial(&self) -> Serial {
        return self.alias.version_serial();
    }

    fn is_stale(&self) -> bool {
        return self.alias.is_stale();
    }

    fn is_mutable(&self) -> bool {
        return true;
    }

    fn dependencies(&self) -> Vec<VersionRef> {
        return self.alias.dependencies();
    }

    fn next_version(&self) {
        self.alias.next_version();
    }
}

impl<V: Clone + PartialEq + 'static> Versioned<V> for Property<V> {
    fn get(&self) -> V {
        return self.alias.get();
    }

    fn data_snapshot(&self) -> DataSnapshot<V> {
        return self.alias.data_snapshot();
    }

    fn set(&self, value: V) -> Result<()> {
        return self.alias.set(value);
    }

    fn is_settable(&self) -> bool {
        return self.alias.is_settable();
    }
}

impl<V: Clone + PartialEq + fmt::Debug + 'static> fmt::Debug for Property<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f
            .debug_struct("Property")
            .field("name", &self.name)
            .field("connected", &self.connected.get())
            .field("value", &self.alias.get())
            .finish();
    }
}

// =============================================================================
// PropertyArray
// =============================================================================

type Aggregate<V> = Box<dyn Fn(&[V]) -> V>;
type Distribute<V> = Box<dyn Fn(&V, usize) -> Vec<V>>;

pub struct PropertyArray<V> {
    clock: Clock,
    aggregate: Rc<Property<V>>,
    items: Vec<Rc<Property<V>>>,
    aggregate_fn: Aggregate<V>,
    distribute_fn: Distribute<V>,
    synced: Cell<Serial>,
    guard: Reentrancy,
}

impl<V: Clone + PartialEq + 'static> PropertyArray<V> {
    pub fn new(
        name: &str,
        size: usize,
        initial: V,
        aggregate: impl Fn(&[V]) -> V + 'static,
        distribute: impl Fn(&V, usize) -> Vec<V> + 'static,
    ) -> Rc<PropertyArray<V>> {
        return PropertyArray::new_in(&Clock::current(), name, size, initial, aggregate, distribute);
    }

    pub fn new_in(
        clock: &Clock,
        name: &str,
        size: usize,
        initial: V,
        aggregate: impl Fn(&[V]) -> V + 'static,
        distribute: impl Fn(&V, usize) -> Vec<V> + 'static,
    ) -> Rc<PropertyArray<V>> {
        let values = distribute(&initial, size);
        let items = (0..size)
            .map(|i| {
                let value = values.get(i).cloned().unwrap_or_else(|| initial.clone());
                return Property::new_in(clock, &format!("{}[{}]", name, i), value);
            })
            .collect();
        return Rc::new(PropertyArray {
            clock: clock.clone(),
            aggregate: Property::new_in(clock, name, initial),
            items,
            aggregate_fn: Box::new(aggregate),
            distribute_fn: Box::new(distribute),
            synced: Cell::new(NULL_SERIAL),
            guard: Reentrancy::new(),
        });
    }

    #[inline]
    pub fn len(&self) -> usize {
        return self.items.len();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        return self.items.is_empty();
    }

    pub fn aggregate(&self) -> &Rc<Property<V>> {
        return &self.aggregate;
    }

    /// The item property at `index`. Panics when out of range.
    pub fn item(&self, index: usize) -> &Rc<Property<V>> {
        return &self.items[index];
    }

    pub fn items(&self) -> &[Rc<Property<V>>] {
        return &self.items;
    }

    /// The synchronized value of one item.
    pub fn item_value(&self, index: usize) -> V {
        self.sync();
        return self.items[index].get();
    }

    /// Write one item and re-aggregate under a single serial.
    pub fn set_item(&self, index: usize, value: V) -> Result<()> {
        return self.clock.grouped_update(|| {
            self.items[index].set(value)?;
            self.sync();
            return Ok(());
        });
    }

    pub fn connect(&self, target: Shared<V>) {
        self.aggregate.connect(target);
    }

    pub fn disconnect(&self) {
        self.aggregate.disconnect();
    }

    fn items_serial(&self) -> Serial {
        return self
            .items
            .iter()
            .map(|item| item.version_serial())
            .max()
            .unwrap_or(NULL_SERIAL);
    }

    /// Reconcile the aggregate with the items, whichever side moved last.
    pub fn sync(&self) {
        let Some(_token) = self.guard.enter() else {
            return;
        };

        refresh(self.aggregate.as_ref());
        for item in &self.items {
            refresh(item.as_ref());
        }

        let synced = self.synced.get();
        let aggregate_serial = self.aggregate.version_serial();
        let items_serial = self.items_serial();

        if aggregate_serial > synced && aggregate_serial >= items_serial {
            let total = self.aggregate.get();
            let values = (self.distribute_fn)(&total, self.items.len());
            self.clock.grouped_update(|| {
                for (item, value) in self.items.iter().zip(values) {
                    if let Err(err) = item.set(value) {
                        warn!("property {} not distributed: {}", item.name(), err);
                    }
                }
            });
        } else if items_serial > synced {
            let values: Vec<V> = self.items.iter().map(|item| item.get()).collect();
            let total = (self.aggregate_fn)(&values);
            self.clock.grouped_update(|| {
                if let Err(err) = self.aggregate.set(total) {
                    warn!("property {} not aggregated: {}", self.aggregate.name(), err);
                }
            });
        }

        let serial = self.aggregate.version_serial().max(self.items_serial());
        self.synced.set(serial.max(synced));
    }
}

/// Split `total` into `n` integer parts, earlier parts taking the remainder.
pub fn distribute_evenly(total: &i32, n: usize) -> Vec<i32> {
    if n == 0 {
        return Vec::new();
    }
    let count = n as i32;
    let whole = total / count;
    let remainder = total - whole * count;
    return (0..count)
        .map(|c| whole + if c < remainder { 1 } else { 0 })
        .collect();
}

impl PropertyArray<i32> {
    /// An array whose aggregate is the sum of its items.
    pub fn summing(name: &str, size: usize) -> Rc<PropertyArray<i32>> {
        return PropertyArray::new(name, size, 0, |items| items.iter().sum(), distribute_evenly);
    }

    pub fn summing_in(clock: &Clock, name: &str, size: usize) -> Rc<PropertyArray<i32>> {
        return PropertyArray::new_in(clock, name, size, 0, |items| items.iter().sum(), distribute_evenly);
    }
}

impl<V: Clone + PartialEq + 'static> Version for PropertyArray<V> {
    fn version_serial(&self) -> Serial {
        self.sync();
        return self.aggregate.version_serial();
    }

    fn is_stale(&self) -> bool {
        return self.aggregate.is_stale();
    }

    fn is_mutable(&self) -> bool {
        return true;
    }

    fn dependencies(&self) -> Vec<VersionRef> {
        return self.aggregate.dependencies();
    }

    fn next_version(&self) {
        self.aggregate.next_version();
        self.sync();
    }
}

impl<V: Clone + PartialEq + 'static> Versioned<V> for PropertyArray<V> {
    fn get(&self) -> V {
        self.sync();
        return self.aggregate.get();
    }

    fn data_snapshot(&self) -> DataSnapshot<V> {
        self.sync();
        return self.aggregate.data_snapshot();
    }

    /// The aggregate and the items it distributes to share one serial.
    fn set(&self, value: V) -> Result<()> {
        return self.clock.grouped_update(|| {
            self.aggregate.set(value)?;
            self.sync();
            return Ok(());
        });
    }

    fn is_settable(&self) -> bool {
        return self.aggregate.is_settable();
    }
}

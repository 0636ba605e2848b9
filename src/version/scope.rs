//! Hierarchical data scopes with named, dependency-ordered keys.
//!
//! A [`ScopeManager`] owns a registry of [`DataKey`]s and an arena of scopes
//! forming a tree. Consumers ask a scope for a key's data point before the
//! producers exist; they receive an [`Alias`] bound to the key's null data.
//! [`ScopeManager::finalize_all_scopes`] later computes the providing cells,
//! in key dependency order, and rebinds every consumer alias to them.
//!
//! Keys reference their dependencies by name, so keys may be registered in
//! any order. Registering a key whose dependencies lead back to itself fails
//! immediately.

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use super::alias::same_cell;
use super::{Alias, Clock, ImmutableCell, IterableCell, LatestCell, Shared, VolatileCell};
use crate::error::{Error, Result};

bitflags! {
    /// Which scopes relative to the computing one a key draws its inputs from.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Scopes: u8 {
        const SELF = 1;
        const PARENT = 2;
        const ANCESTORS = 4;
        const CHILDREN = 8;
        const DESCENDANTS = 16;
        const INDICES = 32;
    }
}

impl Scopes {
    pub const TOP_DOWN: Scopes = Scopes::SELF.union(Scopes::CHILDREN).union(Scopes::DESCENDANTS);

    #[inline]
    pub fn is_ancestors_set(self) -> bool {
        return self.intersects(Scopes::PARENT | Scopes::ANCESTORS);
    }

    #[inline]
    pub fn is_descendants_set(self) -> bool {
        return self.intersects(Scopes::CHILDREN | Scopes::DESCENDANTS);
    }

    #[inline]
    pub fn is_indices_set(self) -> bool {
        return self.contains(Scopes::INDICES);
    }

    /// Upward and downward flags can not be mixed, and `INDICES` is reserved.
    pub fn is_valid_set(self) -> bool {
        return !(self.is_ancestors_set() && self.is_descendants_set()) && !self.is_indices_set();
    }
}

// =============================================================================
// Keys
// =============================================================================

type Transform<V> = Rc<dyn Fn(&V) -> V>;
type Combine<V> = Rc<dyn Fn(&[V]) -> V>;

pub enum KeyKind<V> {
    /// Set explicitly per scope, inherited down the parent chain.
    Volatile,
    /// Computed from the same key's value in the parent scope.
    ParentComputed(Transform<V>),
    /// Combines `source` over the scopes selected by `scopes`.
    Aggregated { source: String, scopes: Scopes, combine: Combine<V> },
    /// The newest value of `source` over the selected scopes.
    Latest { source: String, scopes: Scopes },
    /// Computed from other keys of the same scope.
    Dependent { deps: Vec<String>, combine: Combine<V> },
}

pub struct DataKey<V> {
    name: String,
    null_value: V,
    null_data: Shared<V>,
    kind: KeyKind<V>,
}

impl<V: Clone + PartialEq + 'static> DataKey<V> {
    fn with_kind(name: &str, null_value: V, kind: KeyKind<V>) -> DataKey<V> {
        return DataKey {
            name: name.to_string(),
            null_data: ImmutableCell::new(null_value.clone()),
            null_value,
            kind,
        };
    }

    pub fn volatile(name: &str, null_value: V) -> DataKey<V> {
        return DataKey::with_kind(name, null_value, KeyKind::Volatile);
    }

    pub fn parent_computed(name: &str, null_value: V, compute: impl Fn(&V) -> V + 'static) -> DataKey<V> {
        return DataKey::with_kind(name, null_value, KeyKind::ParentComputed(Rc::new(compute)));
    }

    pub fn aggregated(
        name: &str,
        null_value: V,
        source: &str,
        scopes: Scopes,
        combine: impl Fn(&[V]) -> V + 'static,
    ) -> DataKey<V> {
        let kind = KeyKind::Aggregated {
            source: source.to_string(),
            scopes,
            combine: Rc::new(combine),
        };
        return DataKey::with_kind(name, null_value, kind);
    }

    pub fn latest(name: &str, null_value: V, source: &str, scopes: Scopes) -> DataKey<V> {
        let kind = KeyKind::Latest {
            source: source.to_string(),
            scopes,
        };
        return DataKey::with_kind(name, null_value, kind);
    }

    pub fn dependent(name: &str, null_value: V, deps: &[&str], combine: impl Fn(&[V]) -> V + 'static) -> DataKey<V> {
        let kind = KeyKind::Dependent {
            deps: deps.iter().map(|dep| dep.to_string()).collect(),
            combine: Rc::new(combine),
        };
        return DataKey::with_kind(name, null_value, kind);
    }

    /// A dependent key over a single other key.
    pub fn transformed(name: &str, null_value: V, dep: &str, transform: impl Fn(&V) -> V + 'static) -> DataKey<V> {
        return DataKey::dependent(name, null_value, &[dep], move |values| transform(&values[0]));
    }
}

impl<V> DataKey<V> {
    pub fn name(&self) -> &str {
        return &self.name;
    }

    pub fn null_value(&self) -> &V {
        return &self.null_value;
    }

    pub fn null_data(&self) -> &Shared<V> {
        return &self.null_data;
    }

    pub fn kind(&self) -> &KeyKind<V> {
        return &self.kind;
    }

    pub fn scopes(&self) -> Scopes {
        return match &self.kind {
            KeyKind::Volatile | KeyKind::Dependent { .. } => Scopes::SELF,
            KeyKind::ParentComputed(_) => Scopes::PARENT,
            KeyKind::Aggregated { scopes, .. } | KeyKind::Latest { scopes, .. } => *scopes,
        };
    }

    /// Names of the keys this one is computed from.
    pub fn dependencies(&self) -> Vec<&str> {
        return match &self.kind {
            KeyKind::Volatile => Vec::new(),
            KeyKind::ParentComputed(_) => vec![self.name.as_str()],
            KeyKind::Aggregated { source, .. } | KeyKind::Latest { source, .. } => vec![source.as_str()],
            KeyKind::Dependent { deps, .. } => deps.iter().map(String::as_str).collect(),
        };
    }

    /// Independent keys depend on nothing but, at most, themselves.
    pub fn is_independent(&self) -> bool {
        return self.dependencies().iter().all(|dep| *dep == self.name);
    }
}

impl<V> fmt::Debug for DataKey<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "DataKey({})", self.name);
    }
}

// =============================================================================
// Scopes
// =============================================================================

pub type ScopeId = usize;
pub type KeyId = usize;

enum DataPoint<V> {
    Value(Shared<V>),
    Alias(Rc<Alias<V>>),
}

struct ScopeNode<V> {
    name: String,
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
    level: usize,
    values: FxHashMap<(KeyId, usize), DataPoint<V>>,
    consumers: Vec<(KeyId, usize)>,
}

pub struct ScopeManager<V> {
    clock: Clock,
    keys: Vec<Rc<DataKey<V>>>,
    key_ids: FxHashMap<String, KeyId>,
    levels: Option<FxHashMap<KeyId, usize>>,
    scopes: Vec<ScopeNode<V>>,
    computed: FxHashMap<(ScopeId, KeyId, usize), Shared<V>>,
    computing: FxHashSet<(ScopeId, KeyId, usize)>,
}

impl<V: Clone + PartialEq + 'static> ScopeManager<V> {
    pub fn new() -> ScopeManager<V> {
        return ScopeManager::new_in(&Clock::current());
    }

    pub fn new_in(clock: &Clock) -> ScopeManager<V> {
        return ScopeManager {
            clock: clock.clone(),
            keys: Vec::new(),
            key_ids: FxHashMap::default(),
            levels: None,
            scopes: Vec::new(),
            computed: FxHashMap::default(),
            computing: FxHashSet::default(),
        };
    }

    // ===== Key registry =====

    /// Add a key to the registry.
    ///
    /// Fails with [`Error::CircularDependency`] when the key's dependencies
    /// reach back to it, and [`Error::InvalidScopes`] for a scope set that
    /// mixes upward with downward flags.
    pub fn register_key(&mut self, key: DataKey<V>) -> Result<KeyId> {
        if !key.scopes().is_valid_set() {
            return Err(Error::InvalidScopes);
        }

        for dep in key.dependencies() {
            if dep != key.name && self.reaches(dep, &key.name) {
                return Err(Error::CircularDependency(key.name.clone()));
            }
        }

        self.levels = None;
        if let Some(&id) = self.key_ids.get(&key.name) {
            self.keys[id] = Rc::new(key);
            return Ok(id);
        }
        let id = self.keys.len();
        self.key_ids.insert(key.name.clone(), id);
        self.keys.push(Rc::new(key));
        return Ok(id);
    }

    /// Whether following dependencies from `from` arrives at `target`.
    fn reaches(&self, from: &str, target: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut seen: FxHashSet<String> = FxHashSet::default();
        while let Some(name) = stack.pop() {
            if name == target {
                return true;
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            let Some(&id) = self.key_ids.get(&name) else {
                continue;
            };
            for dep in self.keys[id].dependencies() {
                if dep != name {
                    stack.push(dep.to_string());
                }
            }
        }
        return false;
    }

    pub fn key_id(&self, name: &str) -> Result<KeyId> {
        return self
            .key_ids
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownKey(name.to_string()));
    }

    pub fn key(&self, name: &str) -> Option<&DataKey<V>> {
        return self.key_ids.get(name).map(|&id| self.keys[id].as_ref());
    }

    /// Keys that list `name` among their dependencies.
    pub fn dependent_keys(&self, name: &str) -> Vec<&str> {
        let mut result: Vec<&str> = self
            .keys
            .iter()
            .filter(|key| key.name != name && key.dependencies().contains(&name))
            .map(|key| key.name.as_str())
            .collect();
        result.sort_unstable();
        return result;
    }

    /// Assign every key a compute level: independent keys get 0, any other
    /// key one more than the highest level among its dependencies.
    pub fn resolve_dependencies(&mut self) -> Result<()> {
        if self.levels.is_some() {
            return Ok(());
        }

        let mut deps: Vec<Vec<KeyId>> = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let mut ids = Vec::new();
            for dep in key.dependencies() {
                if dep != key.name {
                    ids.push(self.key_id(dep)?);
                }
            }
            deps.push(ids);
        }

        let mut levels: FxHashMap<KeyId, usize> = FxHashMap::default();
        let mut unresolved: Vec<KeyId> = Vec::new();
        for (id, key_deps) in deps.iter().enumerate() {
            if key_deps.is_empty() {
                levels.insert(id, 0);
            } else {
                unresolved.push(id);
            }
        }

        let mut level = 1;
        while !unresolved.is_empty() {
            let ready: Vec<KeyId> = unresolved
                .iter()
                .copied()
                .filter(|id| deps[*id].iter().all(|dep| levels.contains_key(dep)))
                .collect();
            if ready.is_empty() {
                let names: Vec<&str> = unresolved.iter().map(|id| self.keys[*id].name()).collect();
                return Err(Error::UnresolvedLevel(names.join(", ")));
            }
            for id in &ready {
                levels.insert(*id, level);
            }
            unresolved.retain(|id| !ready.contains(id));
            level += 1;
        }

        debug!("resolved {} data keys into {} compute levels", self.keys.len(), level);
        self.levels = Some(levels);
        return Ok(());
    }

    pub fn key_level(&mut self, name: &str) -> Result<usize> {
        let id = self.key_id(name)?;
        return self.level_of(id);
    }

    fn level_of(&mut self, id: KeyId) -> Result<usize> {
        self.resolve_dependencies()?;
        return Ok(self.levels.as_ref().and_then(|levels| levels.get(&id).copied()).unwrap_or(0));
    }

    /// The given keys and everything they depend on, grouped by compute
    /// level from lowest to highest. Names inside a level are sorted.
    pub fn compute_key_order(&mut self, names: &[&str]) -> Result<Vec<Vec<String>>> {
        self.resolve_dependencies()?;

        let mut needed: FxHashSet<KeyId> = FxHashSet::default();
        let mut stack: Vec<KeyId> = Vec::new();
        for name in names {
            stack.push(self.key_id(name)?);
        }
        while let Some(id) = stack.pop() {
            if !needed.insert(id) {
                continue;
            }
            for dep in self.keys[id].dependencies() {
                stack.push(self.key_id(dep)?);
            }
        }

        let mut by_level: Vec<Vec<String>> = Vec::new();
        for id in needed {
            let level = self.level_of(id)?;
            if by_level.len() <= level {
                by_level.resize(level + 1, Vec::new());
            }
            by_level[level].push(self.keys[id].name.clone());
        }
        for level in &mut by_level {
            level.sort();
        }
        by_level.retain(|level| !level.is_empty());
        return Ok(by_level);
    }

    // ===== Scope tree =====

    pub fn create_scope(&mut self, name: &str, parent: Option<ScopeId>) -> ScopeId {
        let id = self.scopes.len();
        let level = match parent {
            Some(parent) => {
                self.scopes[parent].children.push(id);
                self.scopes[parent].level + 1
            }
            None => 0,
        };
        self.scopes.push(ScopeNode {
            name: name.to_string(),
            parent,
            children: Vec::new(),
            level,
            values: FxHashMap::default(),
            consumers: Vec::new(),
        });
        return id;
    }

    pub fn scope_name(&self, scope: ScopeId) -> &str {
        return &self.scopes[scope].name;
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        return self.scopes[scope].parent;
    }

    pub fn level(&self, scope: ScopeId) -> usize {
        return self.scopes[scope].level;
    }

    pub fn children(&self, scope: ScopeId) -> &[ScopeId] {
        return &self.scopes[scope].children;
    }

    /// Scopes below the children, in pre-order.
    pub fn descendants(&self, scope: ScopeId) -> Vec<ScopeId> {
        let mut result = Vec::new();
        for &child in &self.scopes[scope].children {
            self.collect_subtree(child, &mut result);
        }
        return result;
    }

    fn collect_subtree(&self, scope: ScopeId, out: &mut Vec<ScopeId>) {
        for &child in &self.scopes[scope].children {
            out.push(child);
            self.collect_subtree(child, out);
        }
    }

    /// Scopes above the parent, from the root down.
    pub fn ancestors(&self, scope: ScopeId) -> Vec<ScopeId> {
        let mut result = Vec::new();
        let mut current = self.scopes[scope].parent.and_then(|parent| self.scopes[parent].parent);
        while let Some(id) = current {
            result.push(id);
            current = self.scopes[id].parent;
        }
        result.reverse();
        return result;
    }

    fn scope_set(&self, scope: ScopeId, scopes: Scopes) -> Vec<ScopeId> {
        let mut result = Vec::new();
        if scopes.contains(Scopes::ANCESTORS) {
            result.extend(self.ancestors(scope));
        }
        if scopes.contains(Scopes::PARENT) {
            result.extend(self.scopes[scope].parent);
        }
        if scopes.contains(Scopes::SELF) {
            result.push(scope);
        }
        if scopes.contains(Scopes::CHILDREN) {
            result.extend_from_slice(&self.scopes[scope].children);
        }
        if scopes.contains(Scopes::DESCENDANTS) {
            result.extend(self.descendants(scope));
        }
        return result;
    }

    /// Keys and indices with a pending consumer in `scope`.
    pub fn consumers(&self, scope: ScopeId) -> Vec<(&str, usize)> {
        return self.scopes[scope]
            .consumers
            .iter()
            .map(|&(key, index)| (self.keys[key].name(), index))
            .collect();
    }

    // ===== Data points =====

    /// Install `value` as the data for `key[index]` in `scope`.
    ///
    /// If a consumer alias is already waiting there it is rebound to
    /// `value`. Installing over concrete data fails with
    /// [`Error::ValueOverValue`]; installing an alias over an alias fails
    /// with [`Error::DoubleAlias`].
    pub fn set_value(&mut self, scope: ScopeId, key: &str, index: usize, value: Shared<V>) -> Result<()> {
        let key = self.key_id(key)?;
        let values = &mut self.scopes[scope].values;
        match values.get(&(key, index)) {
            Some(DataPoint::Alias(alias)) => {
                if value.alias_target().is_some() {
                    return Err(Error::DoubleAlias);
                }
                alias.set_target(value);
            }
            Some(DataPoint::Value(_)) => return Err(Error::ValueOverValue),
            None => {
                values.insert((key, index), DataPoint::Value(value));
            }
        }
        return Ok(());
    }

    /// Store a plain value: writes into existing settable data, otherwise
    /// installs a new volatile cell.
    pub fn set(&mut self, scope: ScopeId, key: &str, index: usize, value: V) -> Result<()> {
        let key_id = self.key_id(key)?;
        let null_data = Rc::clone(&self.keys[key_id].null_data);
        let existing = match self.scopes[scope].values.get(&(key_id, index)) {
            Some(DataPoint::Value(cell)) => Some(Rc::clone(cell)),
            Some(DataPoint::Alias(alias)) if !alias.is_targeting(&null_data) => Some(alias.clone() as Shared<V>),
            _ => None,
        };
        if let Some(cell) = existing {
            if cell.is_settable() {
                return cell.set(value);
            }
            return Err(Error::ValueOverValue);
        }
        let cell = VolatileCell::new_in(&self.clock, value);
        return self.set_value(scope, key, index, cell);
    }

    /// The data for `key[index]` visible from `scope`, searching up the
    /// parent chain and looking through aliases.
    pub fn get_value(&self, scope: ScopeId, key: &str, index: usize) -> Option<Shared<V>> {
        let key = self.key_ids.get(key).copied()?;
        let mut current = Some(scope);
        while let Some(id) = current {
            match self.scopes[id].values.get(&(key, index)) {
                Some(DataPoint::Value(cell)) => return Some(Rc::clone(cell)),
                Some(DataPoint::Alias(alias)) => return Some(alias.target()),
                None => current = self.scopes[id].parent,
            }
        }
        return None;
    }

    /// The data stored directly in `scope`, aliases included.
    pub fn get_raw_value(&self, scope: ScopeId, key: &str, index: usize) -> Option<Shared<V>> {
        let key = self.key_ids.get(key).copied()?;
        return match self.scopes[scope].values.get(&(key, index))? {
            DataPoint::Value(cell) => Some(Rc::clone(cell)),
            DataPoint::Alias(alias) => Some(alias.clone() as Shared<V>),
        };
    }

    /// Whether the data stored in `scope` for `key[index]` is an alias.
    pub fn is_alias(&self, scope: ScopeId, key: &str, index: usize) -> bool {
        let Some(&key) = self.key_ids.get(key) else {
            return false;
        };
        return matches!(self.scopes[scope].values.get(&(key, index)), Some(DataPoint::Alias(_)));
    }

    /// An alias through which `scope` reads `key[index]`.
    ///
    /// Missing data gets an alias bound to the key's null data and is
    /// recorded as a consumer to be resolved by `finalize_all_scopes`.
    /// Existing concrete data is wrapped in an alias in place.
    pub fn consumer_data_point(&mut self, scope: ScopeId, key: &str, index: usize) -> Result<Rc<Alias<V>>> {
        let key = self.key_id(key)?;
        let null_data = Rc::clone(&self.keys[key].null_data);
        let node = &mut self.scopes[scope];
        let alias = match node.values.get(&(key, index)) {
            Some(DataPoint::Alias(alias)) => return Ok(alias.clone()),
            Some(DataPoint::Value(cell)) => Alias::new_in(&self.clock, Rc::clone(cell)),
            None => {
                node.consumers.push((key, index));
                Alias::new_in(&self.clock, null_data)
            }
        };
        node.values.insert((key, index), DataPoint::Alias(alias.clone()));
        return Ok(alias);
    }

    // ===== Providers =====

    fn is_null(&self, key: KeyId, cell: &Shared<V>) -> bool {
        return same_cell(&self.keys[key].null_data, cell);
    }

    /// Concrete data stored directly in `scope`, skipping unresolved aliases.
    fn provided_raw(&self, scope: ScopeId, key: KeyId, index: usize) -> Option<Shared<V>> {
        return match self.scopes[scope].values.get(&(key, index))? {
            DataPoint::Value(cell) => Some(Rc::clone(cell)),
            DataPoint::Alias(alias) => {
                let target = alias.target();
                if self.is_null(key, &target) {
                    return None;
                }
                Some(target)
            }
        };
    }

    /// Whether `scope` contributes its own value of `key` to an aggregate.
    fn is_provided(&self, scope: ScopeId, key: KeyId, index: usize) -> bool {
        if self.provided_raw(scope, key, index).is_some() {
            return true;
        }
        return match &self.keys[key].kind {
            KeyKind::Volatile => false,
            KeyKind::ParentComputed(_) => self.scopes[scope].parent.is_some(),
            KeyKind::Aggregated { .. } | KeyKind::Latest { .. } => true,
            KeyKind::Dependent { deps, .. } => deps.iter().all(|dep| match self.key_ids.get(dep) {
                Some(&dep) => self.is_provided(scope, dep, index),
                None => false,
            }),
        };
    }

    /// The cell providing `key[index]` for `scope`, computing it if needed.
    ///
    /// A provider whose computation needs its own value fails with
    /// [`Error::RecursiveCompute`].
    pub fn ensure_value(&mut self, scope: ScopeId, key: &str, index: usize) -> Result<Shared<V>> {
        let key = self.key_id(key)?;
        return self.ensure(scope, key, index);
    }

    fn ensure(&mut self, scope: ScopeId, key: KeyId, index: usize) -> Result<Shared<V>> {
        if let Some(cell) = self.provided_raw(scope, key, index) {
            return Ok(cell);
        }
        if let Some(cell) = self.computed.get(&(scope, key, index)) {
            return Ok(Rc::clone(cell));
        }
        if !self.computing.insert((scope, key, index)) {
            let name = format!("{}[{}] in {}", self.keys[key].name, index, self.scopes[scope].name);
            return Err(Error::RecursiveCompute(name));
        }
        let result = self.compute(scope, key, index);
        self.computing.remove(&(scope, key, index));

        let cell = result?;
        self.computed.insert((scope, key, index), Rc::clone(&cell));
        return Ok(cell);
    }

    fn compute(&mut self, scope: ScopeId, key: KeyId, index: usize) -> Result<Shared<V>> {
        let data_key = Rc::clone(&self.keys[key]);
        match &data_key.kind {
            KeyKind::Volatile => {
                let mut current = self.scopes[scope].parent;
                while let Some(id) = current {
                    if let Some(cell) = self.provided_raw(id, key, index) {
                        return Ok(cell);
                    }
                    current = self.scopes[id].parent;
                }
                return Ok(Rc::clone(&data_key.null_data));
            }
            KeyKind::ParentComputed(transform) => {
                let Some(parent) = self.scopes[scope].parent else {
                    return Ok(Rc::clone(&data_key.null_data));
                };
                let base = self.ensure(parent, key, index)?;
                let transform = Rc::clone(transform);
                let cell = IterableCell::new_in(&self.clock, vec![base], move |values| transform(&values[0]));
                return Ok(cell);
            }
            KeyKind::Aggregated { source, scopes, combine } => {
                let deps = self.sources(scope, source, *scopes, index)?;
                if deps.is_empty() {
                    return Ok(Rc::clone(&data_key.null_data));
                }
                let combine = Rc::clone(combine);
                let cell = IterableCell::new_in(&self.clock, deps, move |values| combine(values));
                return Ok(cell);
            }
            KeyKind::Latest { source, scopes } => {
                let deps = self.sources(scope, source, *scopes, index)?;
                if deps.is_empty() {
                    return Ok(Rc::clone(&data_key.null_data));
                }
                let cell = LatestCell::new_in(&self.clock, deps, None)?;
                return Ok(cell);
            }
            KeyKind::Dependent { deps, combine } => {
                let mut cells = Vec::with_capacity(deps.len());
                for dep in deps {
                    let dep = self.key_id(dep)?;
                    cells.push(self.ensure(scope, dep, index)?);
                }
                let combine = Rc::clone(combine);
                let cell = IterableCell::new_in(&self.clock, cells, move |values| combine(values));
                return Ok(cell);
            }
        }
    }

    fn sources(&mut self, scope: ScopeId, source: &str, scopes: Scopes, index: usize) -> Result<Vec<Shared<V>>> {
        let source = self.key_id(source)?;
        let mut deps = Vec::new();
        for id in self.scope_set(scope, scopes) {
            if self.is_provided(id, source, index) {
                deps.push(self.ensure(id, source, index)?);
            }
        }
        return Ok(deps);
    }

    /// Bind every pending consumer in the tree rooted at `top`.
    ///
    /// Consumers are resolved in key compute-level order, shallow scopes
    /// first. A consumer with no provider anywhere keeps its null data.
    /// Only valid on a root scope.
    pub fn finalize_all_scopes(&mut self, top: ScopeId) -> Result<()> {
        if self.scopes[top].parent.is_some() {
            return Err(Error::NotTopScope(self.scopes[top].name.clone()));
        }
        self.resolve_dependencies()?;

        let mut tree = vec![top];
        tree.extend(self.scopes[top].children.clone());
        tree.extend(self.descendants(top));

        let mut pending: Vec<(usize, usize, ScopeId, KeyId, usize)> = Vec::new();
        for &scope in &tree {
            for &(key, index) in &self.scopes[scope].consumers {
                let level = self.levels.as_ref().and_then(|levels| levels.get(&key).copied()).unwrap_or(0);
                pending.push((level, self.scopes[scope].level, scope, key, index));
            }
        }
        pending.sort_unstable();

        debug!("finalizing {} consumers under scope {}", pending.len(), self.scopes[top].name);
        for (_, _, scope, key, index) in pending {
            let Some(DataPoint::Alias(alias)) = self.scopes[scope].values.get(&(key, index)) else {
                continue;
            };
            let alias = alias.clone();
            if !alias.is_targeting(&self.keys[key].null_data) {
                continue;
            }
            let cell = self.ensure(scope, key, index)?;
            if !self.is_null(key, &cell) {
                alias.set_target(cell);
            }
        }

        for scope in tree {
            self.scopes[scope].consumers.clear();
        }
        self.computed.clear();
        return Ok(());
    }
}

impl<V: Clone + PartialEq + 'static> Default for ScopeManager<V> {
    fn default() -> ScopeManager<V> {
        return ScopeManager::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Versioned;

    fn manager() -> ScopeManager<i32> {
        return ScopeManager::new();
    }

    #[test]
    fn test_scope_flags() {
        assert!(Scopes::TOP_DOWN.is_valid_set());
        assert!(Scopes::TOP_DOWN.is_descendants_set());
        assert!(!(Scopes::PARENT | Scopes::CHILDREN).is_valid_set());
        assert!(!(Scopes::SELF | Scopes::INDICES).is_valid_set());
        assert!((Scopes::SELF | Scopes::ANCESTORS).is_ancestors_set());
    }

    #[test]
    fn test_child_scopes() {
        let mut m = manager();
        let top = m.create_scope("top", None);
        let child1 = m.create_scope("child1", Some(top));
        let child2 = m.create_scope("child2", Some(top));
        let grand = m.create_scope("grandChild21", Some(child2));

        assert_eq!(m.children(top).len(), 2);
        assert_eq!(m.descendants(top), vec![grand]);
        assert_eq!(m.children(child2), &[grand]);
        assert_eq!(m.ancestors(grand), vec![top]);
        assert!(m.ancestors(child1).is_empty());
        assert_eq!(m.level(grand), 2);
        assert_eq!(m.parent(child1), Some(top));
    }

    #[test]
    fn test_default_consumers() {
        let mut m = manager();
        m.register_key(DataKey::volatile("INDENT", 0)).unwrap();
        let top = m.create_scope("top", None);

        let indent = m.consumer_data_point(top, "INDENT", 0).unwrap();
        let indent2 = m.consumer_data_point(top, "INDENT", 2).unwrap();
        assert_eq!(m.consumers(top), vec![("INDENT", 0), ("INDENT", 2)]);
        assert_eq!(indent.get(), 0);
        assert_eq!(indent2.get(), 0);
    }

    #[test]
    fn test_volatile_set_after_consumer() {
        let mut m = manager();
        m.register_key(DataKey::volatile("INDENT", 0)).unwrap();
        let top = m.create_scope("top", None);

        let indent = VolatileCell::new(0);
        let consumer = m.consumer_data_point(top, "INDENT", 0).unwrap();
        m.set_value(top, "INDENT", 0, indent.clone()).unwrap();

        indent.set_value(1);
        assert_eq!(consumer.get(), 1);
        indent.set_value(10);
        assert_eq!(consumer.get(), 10);
    }

    #[test]
    fn test_value_over_value_and_double_alias() {
        let mut m = manager();
        m.register_key(DataKey::volatile("INDENT", 0)).unwrap();
        let top = m.create_scope("top", None);

        m.set_value(top, "INDENT", 0, VolatileCell::new(0)).unwrap();
        assert_eq!(m.set_value(top, "INDENT", 0, VolatileCell::new(1)), Err(Error::ValueOverValue));

        let consumer = m.consumer_data_point(top, "INDENT", 1).unwrap();
        let other = Alias::new(VolatileCell::new(5));
        assert_eq!(m.set_value(top, "INDENT", 1, other), Err(Error::DoubleAlias));
        assert_eq!(consumer.get(), 0);
    }

    #[test]
    fn test_parent_volatile_default() {
        let mut m = manager();
        m.register_key(DataKey::volatile("INDENT", 0)).unwrap();
        let top = m.create_scope("top", None);
        let child = m.create_scope("child", Some(top));

        let indent = VolatileCell::new(0);
        m.set_value(top, "INDENT", 0, indent.clone()).unwrap();
        let my_indent = m.consumer_data_point(child, "INDENT", 0).unwrap();
        assert!(m.consumers(top).is_empty());
        assert_eq!(m.consumers(child).len(), 1);

        indent.set_value(1);
        assert_eq!(my_indent.get(), 0);

        m.finalize_all_scopes(top).unwrap();
        assert!(m.consumers(child).is_empty());

        indent.set_value(10);
        assert_eq!(my_indent.get(), 10);
    }

    #[test]
    fn test_child_value_shadows_parent() {
        let mut m = manager();
        m.register_key(DataKey::volatile("INDENT", 0)).unwrap();
        let top = m.create_scope("top", None);
        let child = m.create_scope("child", Some(top));

        let indent = VolatileCell::new(0);
        let child_indent = VolatileCell::new(0);
        m.set_value(top, "INDENT", 0, indent.clone()).unwrap();
        m.set_value(child, "INDENT", 0, child_indent.clone()).unwrap();
        let my_indent = m.consumer_data_point(child, "INDENT", 0).unwrap();

        indent.set_value(1);
        assert_eq!(my_indent.get(), 0);
        child_indent.set_value(10);
        assert_eq!(my_indent.get(), 10);
    }

    #[test]
    fn test_parent_computed() {
        let mut m = manager();
        m.register_key(DataKey::parent_computed("INDENT", 0, |v| v + 4)).unwrap();
        let top = m.create_scope("top", None);
        let child1 = m.create_scope("child1", Some(top));
        let child2 = m.create_scope("child2", Some(top));
        let grand11 = m.create_scope("grandChild11", Some(child1));
        let grand21 = m.create_scope("grandChild21", Some(child2));

        let indent = VolatileCell::new(0);
        m.set_value(top, "INDENT", 0, indent.clone()).unwrap();
        m.set_value(child1, "INDENT", 0, indent.clone()).unwrap();

        let indent1 = m.consumer_data_point(child1, "INDENT", 0).unwrap();
        let indent2 = m.consumer_data_point(child2, "INDENT", 0).unwrap();
        let indent11 = m.consumer_data_point(grand11, "INDENT", 0).unwrap();
        let indent21 = m.consumer_data_point(grand21, "INDENT", 0).unwrap();

        m.finalize_all_scopes(top).unwrap();
        assert!(m.is_alias(child2, "INDENT", 0));

        assert_eq!(indent1.get(), 0);
        assert_eq!(indent2.get(), 4);
        assert_eq!(indent11.get(), 4);
        assert_eq!(indent21.get(), 8);

        indent.set_value(1);
        assert_eq!(indent1.get(), 1);
        assert_eq!(indent2.get(), 5);
        assert_eq!(indent11.get(), 5);
        assert_eq!(indent21.get(), 9);

        indent.set_value(10);
        assert_eq!(indent2.get(), 14);
        assert_eq!(indent21.get(), 18);
    }

    #[test]
    fn test_aggregated_max() {
        let mut m = manager();
        m.register_key(DataKey::volatile("WIDTH", 0)).unwrap();
        m.register_key(DataKey::aggregated("MAX_WIDTH", 0, "WIDTH", Scopes::TOP_DOWN, |values| {
            values.iter().copied().max().unwrap_or(0)
        }))
        .unwrap();

        let top = m.create_scope("top", None);
        let child1 = m.create_scope("child1", Some(top));
        let child2 = m.create_scope("child2", Some(top));
        let grand11 = m.create_scope("grandChild11", Some(child1));
        let grand21 = m.create_scope("grandChild21", Some(child2));

        m.set(child1, "WIDTH", 0, 10).unwrap();
        m.set(child2, "WIDTH", 0, 15).unwrap();
        m.set(grand11, "WIDTH", 0, 8).unwrap();
        m.set(grand21, "WIDTH", 0, 20).unwrap();
        assert!(!m.is_alias(child1, "WIDTH", 0));

        let max_width = m.consumer_data_point(top, "MAX_WIDTH", 0).unwrap();
        assert_eq!(m.consumers(top), vec![("MAX_WIDTH", 0)]);

        m.finalize_all_scopes(top).unwrap();
        assert_eq!(max_width.get(), 20);

        m.set(grand11, "WIDTH", 0, 12).unwrap();
        m.set(grand21, "WIDTH", 0, 17).unwrap();
        assert_eq!(max_width.get(), 17);

        m.set(grand21, "WIDTH", 0, 10).unwrap();
        assert_eq!(max_width.get(), 15);
    }

    #[test]
    fn test_aggregated_dependencies() {
        let mut m = manager();
        m.register_key(DataKey::dependent("PERIMETER", 0, &["WIDTH", "LENGTH"], |values| {
            values.iter().sum::<i32>() * 2
        }))
        .unwrap();
        m.register_key(DataKey::aggregated("PERIMETER_TOTAL", 0, "PERIMETER", Scopes::TOP_DOWN, |values| {
            values.iter().sum()
        }))
        .unwrap();
        m.register_key(DataKey::volatile("LENGTH", 0)).unwrap();
        m.register_key(DataKey::volatile("WIDTH", 0)).unwrap();

        let top = m.create_scope("top", None);
        let child1 = m.create_scope("child1", Some(top));
        let child2 = m.create_scope("child2", Some(top));
        let grand11 = m.create_scope("grandChild11", Some(child1));
        let grand21 = m.create_scope("grandChild21", Some(child2));

        for (scope, width, length) in [(child1, 10, 20), (child2, 15, 15), (grand11, 8, 12), (grand21, 20, 40)] {
            m.set(scope, "WIDTH", 0, width).unwrap();
            m.set(scope, "LENGTH", 0, length).unwrap();
        }

        let total = m.consumer_data_point(top, "PERIMETER_TOTAL", 0).unwrap();
        m.finalize_all_scopes(top).unwrap();
        assert_eq!(total.get(), 280);

        m.set(grand11, "WIDTH", 0, 12).unwrap();
        m.set(grand11, "LENGTH", 0, 28).unwrap();
        assert_eq!(total.get(), 320);

        m.set(child2, "WIDTH", 0, 10).unwrap();
        assert_eq!(total.get(), 310);
    }

    #[test]
    fn test_latest_over_children() {
        let mut m = manager();
        m.register_key(DataKey::volatile("CARET", 0)).unwrap();
        m.register_key(DataKey::latest("LAST_CARET", 0, "CARET", Scopes::CHILDREN)).unwrap();
        let top = m.create_scope("top", None);
        let a = m.create_scope("a", Some(top));
        let b = m.create_scope("b", Some(top));
        m.set(a, "CARET", 0, 1).unwrap();
        m.set(b, "CARET", 0, 2).unwrap();

        let last = m.consumer_data_point(top, "LAST_CARET", 0).unwrap();
        m.finalize_all_scopes(top).unwrap();
        assert_eq!(last.get(), 2);
        m.set(a, "CARET", 0, 5).unwrap();
        assert_eq!(last.get(), 5);
    }

    #[test]
    fn test_compute_levels() {
        let mut m = manager();
        m.register_key(DataKey::dependent("ADD", 0, &["MAX", "INDENT"], |v| v.iter().sum())).unwrap();
        m.register_key(DataKey::aggregated("MAX", 0, "INDENT", Scopes::TOP_DOWN, |v| {
            v.iter().copied().max().unwrap_or(0)
        }))
        .unwrap();
        m.register_key(DataKey::volatile("INDENT", 0)).unwrap();

        assert_eq!(m.key_level("INDENT").unwrap(), 0);
        assert_eq!(m.key_level("MAX").unwrap(), 1);
        assert_eq!(m.key_level("ADD").unwrap(), 2);
        assert_eq!(m.dependent_keys("INDENT"), vec!["ADD", "MAX"]);
        assert_eq!(
            m.compute_key_order(&["ADD"]).unwrap(),
            vec![vec!["INDENT".to_string()], vec!["MAX".to_string()], vec!["ADD".to_string()]]
        );
    }

    #[test]
    fn test_circular_registration_fails() {
        let mut m = manager();
        m.register_key(DataKey::transformed("A", 0, "B", |v| *v)).unwrap();
        let result = m.register_key(DataKey::transformed("B", 0, "A", |v| *v));
        assert_eq!(result, Err(Error::CircularDependency("B".to_string())));
    }

    #[test]
    fn test_unknown_dependency() {
        let mut m = manager();
        m.register_key(DataKey::transformed("A", 0, "MISSING", |v| *v)).unwrap();
        assert_eq!(m.resolve_dependencies(), Err(Error::UnknownKey("MISSING".to_string())));
    }

    #[test]
    fn test_invalid_scope_set() {
        let mut m = manager();
        let key = DataKey::aggregated("BAD", 0, "X", Scopes::PARENT | Scopes::CHILDREN, |v| v[0]);
        assert_eq!(m.register_key(key), Err(Error::InvalidScopes));
    }

    #[test]
    fn test_finalize_requires_top_scope() {
        let mut m = manager();
        let top = m.create_scope("top", None);
        let child = m.create_scope("child", Some(top));
        assert_eq!(m.finalize_all_scopes(child), Err(Error::NotTopScope("child".to_string())));
    }

    #[test]
    fn test_aggregate_of_aggregate_on_demand() {
        let mut m = manager();
        m.register_key(DataKey::volatile("W", 0)).unwrap();
        m.register_key(DataKey::aggregated("SUM", 0, "SUM_SELF", Scopes::SELF, |v| v.iter().sum()))
            .unwrap();
        m.register_key(DataKey::aggregated("SUM_SELF", 0, "W", Scopes::SELF, |v| v.iter().sum()))
            .unwrap();
        let top = m.create_scope("top", None);
        m.set(top, "W", 0, 3).unwrap();
        let sum = m.ensure_value(top, "SUM", 0).unwrap();
        assert_eq!(sum.get(), 3);
    }
}

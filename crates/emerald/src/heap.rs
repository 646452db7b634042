//! The reference-counted heap arena.
//!
//! Grounded on `original_source/include/emerald/refobj.h` /
//! `src/emerald/refobj.c`: a *reflist* of refcounted records with a normal
//! list and a "wait list" for deferred destruction while the list is
//! locked, plus `lock`/`unlock` scoping and a `cleanup` pass that either
//! resurrects survivors (refcount rose back above zero while waiting) or
//! destroys them.
//!
//! We replace the intrusive doubly-linked list of raw pointers with a
//! generational-free arena (`Vec<Slot>` + a free list of recycled
//! [`HeapId`]s), the same shape as the teacher's `ouros::heap::Heap` /
//! `HeapId`. `spec.md` §9's Design Notes call exactly this out as the
//! idiomatic systems-language substitute for the lock+wait-list scheme;
//! we keep the lock/wait-list discipline itself (needed because node
//! evaluation can decref an object being iterated, e.g. a class's base
//! chain) rather than collapsing straight to scope-exit bulk drop, since
//! Emerald's objects can outlive any single scope.

use std::fmt;

use crate::object::{BoundMethod, BuiltinFunction, ByteArray, EmClass, EmFunction, EmList, EmMap, EmString, FileHandle};
use crate::value::Value;

/// Identifies a live (or formerly live) slot in the heap arena. Stable for
/// the lifetime of the object it names; indices are recycled only after
/// the referenced slot has actually been destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(usize);

impl HeapId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The payload behind a [`HeapId`]. One variant per object kind from
/// `spec.md` §3 "Object variants".
#[derive(Debug)]
pub enum HeapData {
    Str(EmString),
    List(EmList),
    Map(EmMap),
    Function(EmFunction),
    Builtin(BuiltinFunction),
    BoundMethod(BoundMethod),
    Class(EmClass),
    /// A class instance: just a map (per `spec.md` §3, "A class instance
    /// is a map populated by walking base chain...") plus the owning
    /// class, so `_class` lookups and `is_true`/`to_string` delegation
    /// via `_toString` work the same way plain maps do.
    Instance(EmMap, HeapId),
    ByteArray(ByteArray),
    File(FileHandle),
}

impl HeapData {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "String",
            Self::List(_) => "List",
            Self::Map(_) => "Map",
            Self::Function(_) => "Function",
            Self::Builtin(_) => "BuiltinFunction",
            Self::BoundMethod(_) => "BoundMethod",
            Self::Class(_) => "Class",
            Self::Instance(..) => "Instance",
            Self::ByteArray(_) => "ByteArray",
            Self::File(_) => "File",
        }
    }

    /// The `Value`s this object strongly holds, used by [`Heap::destroy`]
    /// to decref children after the object itself is torn down — the
    /// Rust equivalent of the original's destructor-calls-decref-on-
    /// siblings convention (`spec.md` §4.3's "destructors may traverse the
    /// same list").
    fn child_values(&self) -> Vec<Value> {
        match self {
            Self::Str(_) | Self::Builtin(_) | Self::ByteArray(_) | Self::File(_) => Vec::new(),
            Self::List(items) => items.iter().copied().collect(),
            Self::Map(map) => map.values().copied().collect(),
            Self::Function(f) => f.closure.iter().map(|id| Value::Object(*id)).collect(),
            Self::BoundMethod(m) => vec![m.binding, m.function],
            Self::Class(c) => {
                let mut v = vec![Value::Object(c.members)];
                if let Some(base) = c.base {
                    v.push(Value::Object(base));
                }
                v
            }
            Self::Instance(map, class) => {
                let mut v: Vec<Value> = map.values().copied().collect();
                v.push(Value::Object(*class));
                v
            }
        }
    }
}

enum Slot {
    Occupied { data: HeapData, refcount: usize, waiting: bool },
    Free,
}

/// The heap arena plus the lock/wait-list deferred-destruction discipline.
pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<usize>,
    lock_count: u32,
    wait_list: Vec<usize>,
    /// When set, [`Self::allocate`]/[`Self::destroy`] log each op, the
    /// Rust stand-in for the original's `--print-alloc-traffic` debug hook.
    trace: bool,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            lock_count: 0,
            wait_list: Vec::new(),
            trace: false,
        }
    }

    /// Enable/disable per-op allocation/free logging (`emerald-cli`'s
    /// `--print-alloc-traffic` flag).
    pub fn set_trace(&mut self, on: bool) {
        self.trace = on;
    }

    /// Allocate a new object with refcount 1, matching `em_refobj_new`.
    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        let type_name = data.type_name();
        let slot = Slot::Occupied {
            data,
            refcount: 1,
            waiting: false,
        };
        let id = if let Some(index) = self.free_list.pop() {
            self.slots[index] = slot;
            HeapId(index)
        } else {
            self.slots.push(slot);
            HeapId(self.slots.len() - 1)
        };
        if self.trace {
            log::info!("alloc {id} ({type_name})");
        }
        id
    }

    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        match &self.slots[id.0] {
            Slot::Occupied { data, .. } => data,
            Slot::Free => panic!("use of freed heap id {id}"),
        }
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        match &mut self.slots[id.0] {
            Slot::Occupied { data, .. } => data,
            Slot::Free => panic!("use of freed heap id {id}"),
        }
    }

    #[must_use]
    pub fn refcount(&self, id: HeapId) -> usize {
        match &self.slots[id.0] {
            Slot::Occupied { refcount, .. } => *refcount,
            Slot::Free => 0,
        }
    }

    /// `em_refobj_incref`.
    pub fn incref(&mut self, id: HeapId) {
        if let Slot::Occupied { refcount, .. } = &mut self.slots[id.0] {
            *refcount += 1;
        }
    }

    /// `em_refobj_decref`: on reaching zero, destroy immediately unless
    /// the list is locked, in which case the slot moves to the wait list
    /// until the matching `unlock` runs cleanup.
    pub fn decref(&mut self, id: HeapId) {
        let should_wait = match &mut self.slots[id.0] {
            Slot::Occupied { refcount, waiting, .. } => {
                if *refcount == 0 {
                    return;
                }
                *refcount -= 1;
                if *refcount != 0 {
                    return;
                }
                *waiting = self.lock_count > 0;
                *waiting
            }
            Slot::Free => return,
        };
        if should_wait {
            self.wait_list.push(id.0);
        } else {
            self.destroy(id);
        }
    }

    /// Increment/decrement a [`Value`], ignoring non-object values, so
    /// callers can treat every value uniformly the way
    /// `em_value_incref`/`em_value_decref` do.
    pub fn incref_value(&mut self, v: Value) {
        if let Value::Object(id) = v {
            self.incref(id);
        }
    }

    pub fn decref_value(&mut self, v: Value) {
        if let Value::Object(id) = v {
            self.decref(id);
        }
    }

    /// `em_reflist_lock`: prevent immediate destruction while an object
    /// graph rooted here is being traversed (e.g. class base-chain walk,
    /// AST node evaluation).
    pub fn lock(&mut self) {
        self.lock_count += 1;
    }

    /// `em_reflist_unlock`: on the last matching unlock, run `cleanup`.
    pub fn unlock(&mut self) {
        if self.lock_count == 0 {
            return;
        }
        self.lock_count -= 1;
        if self.lock_count == 0 {
            self.cleanup();
        }
    }

    /// `em_reflist_cleanup`: walk the wait list; a survivor (refcount rose
    /// back above zero while it waited) goes back to the normal state,
    /// everything else is destroyed now.
    fn cleanup(&mut self) {
        let pending = std::mem::take(&mut self.wait_list);
        for index in pending {
            let revived = match &mut self.slots[index] {
                Slot::Occupied { refcount, waiting, .. } => {
                    *waiting = false;
                    *refcount > 0
                }
                Slot::Free => continue,
            };
            if !revived {
                self.destroy(HeapId(index));
            }
        }
    }

    /// Tear down a zero-refcount object: drop its data, recycle the slot,
    /// then decref everything it held strong references to. Matches the
    /// original's two-pass destroy (run destructors, then free records) in
    /// spirit: children are only released after this slot is gone, so a
    /// cycle through this same object can't re-enter its own destructor.
    fn destroy(&mut self, id: HeapId) {
        let data = match std::mem::replace(&mut self.slots[id.0], Slot::Free) {
            Slot::Occupied { data, .. } => data,
            Slot::Free => return,
        };
        if self.trace {
            log::info!("free {id} ({})", data.type_name());
        }
        self.free_list.push(id.0);
        let children = data.child_values();
        drop(data);
        for child in children {
            self.decref_value(child);
        }
    }

    /// `em_class_inherits`: walk a class's base chain looking for `target`.
    #[must_use]
    pub fn class_inherits(&self, mut class: HeapId, target: HeapId) -> bool {
        loop {
            if class == target {
                return true;
            }
            let HeapData::Class(c) = self.get(class) else {
                return false;
            };
            match c.base {
                Some(base) => class = base,
                None => return false,
            }
        }
    }

    #[must_use]
    pub fn live_object_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Occupied { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::EmString;

    #[test]
    fn allocate_then_decref_destroys() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapData::Str(EmString::from_str("hi")));
        assert_eq!(heap.refcount(id), 1);
        heap.decref(id);
        assert_eq!(heap.live_object_count(), 0);
    }

    #[test]
    fn locked_list_defers_destruction() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapData::Str(EmString::from_str("hi")));
        heap.lock();
        heap.decref(id);
        assert_eq!(heap.live_object_count(), 1, "destruction deferred while locked");
        heap.unlock();
        assert_eq!(heap.live_object_count(), 0);
    }

    #[test]
    fn revived_object_survives_unlock() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapData::Str(EmString::from_str("hi")));
        heap.lock();
        heap.decref(id);
        heap.incref(id); // revived before unlock
        heap.unlock();
        assert_eq!(heap.live_object_count(), 1);
    }

    #[test]
    fn freed_slot_is_recycled() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapData::Str(EmString::from_str("a")));
        heap.decref(a);
        let b = heap.allocate(HeapData::Str(EmString::from_str("b")));
        assert_eq!(a.index(), b.index());
    }

    #[test]
    fn list_children_are_decrefed_on_destroy() {
        let mut heap = Heap::new();
        let inner = heap.allocate(HeapData::Str(EmString::from_str("x")));
        let list = heap.allocate(HeapData::List(smallvec::smallvec![Value::Object(inner)]));
        heap.incref(inner); // list holds its own reference
        heap.decref(list);
        assert_eq!(heap.refcount(inner), 1);
        heap.decref(inner);
        assert_eq!(heap.live_object_count(), 0);
    }
}

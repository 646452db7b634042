//! The interpreter's mutable per-run state: scope stack, directory search
//! stack, include-once record, and the heap all of it points into.
//!
//! Grounded on `original_source/include/emerald/context.h`'s
//! `em_context_t` (scope stack, directory stack, include list, the
//! raised-error "pass" slot) — we drop the pass slot entirely since
//! `eval::Signal::Return(Value)` already carries the value directly
//! (the redesign `spec.md` §9 calls for), so there is nothing left to
//! stash-and-retrieve across the raised channel.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::diagnostics::RaisedError;
use crate::heap::{Heap, HeapData, HeapId};
use crate::io::{PrintWriter, StdPrint};
use crate::object::hash_chars;
use crate::position::Position;
use crate::value::Value;

/// `spec.md` §5: "scope stack is bounded at 128; directory stack at 32".
pub const MAX_SCOPE_DEPTH: usize = 128;
pub const MAX_DIR_DEPTH: usize = 32;
/// `original_source/src/emerald/module/os.c`'s fixed `files[32]` table,
/// kept as a sandboxing constant per `SPEC_FULL.md`'s os module note even
/// though each handle is its own heap object rather than a side-table slot.
pub const MAX_OPEN_FILES: usize = 32;

pub struct Context {
    pub heap: Heap,
    scopes: Vec<HeapId>,
    dirs: Vec<PathBuf>,
    included: HashSet<PathBuf>,
    open_files: usize,
    pub argv: Vec<String>,
    /// Sink for `puts`/`site.print`/`site.println`. Defaults to stdout;
    /// swap with [`Self::set_output`] to capture or suppress it.
    pub output: Box<dyn PrintWriter>,
}

impl Context {
    #[must_use]
    pub fn new(cwd: PathBuf, stdlib_dir: PathBuf, argv: Vec<String>) -> Self {
        let mut heap = Heap::new();
        let root = heap.allocate(HeapData::Map(crate::object::EmMap::default()));
        Self {
            heap,
            scopes: vec![root],
            dirs: vec![cwd, stdlib_dir],
            included: HashSet::new(),
            open_files: 0,
            argv,
            output: Box::new(StdPrint),
        }
    }

    pub fn set_output(&mut self, output: Box<dyn PrintWriter>) {
        self.output = output;
    }

    #[must_use]
    pub fn root_scope(&self) -> HeapId {
        self.scopes[0]
    }

    /// Push a fresh scope map. Callers must pair with [`Self::pop_scope`].
    pub fn push_scope(&mut self, pos: &Position) -> Result<(), RaisedError> {
        if self.scopes.len() >= MAX_SCOPE_DEPTH {
            return Err(RaisedError::runtime("Scope stack overflow", pos));
        }
        let id = self.heap.allocate(HeapData::Map(crate::object::EmMap::default()));
        self.scopes.push(id);
        Ok(())
    }

    pub fn pop_scope(&mut self) {
        if let Some(id) = self.scopes.pop() {
            self.heap.decref(id);
        }
    }

    /// Push an already-allocated map as a scope, taking a strong reference
    /// to it. Used for `class ... end` bodies, whose member map is pushed
    /// as the active scope while the declarations inside it run, and for
    /// restoring a function's closure chain across a call.
    pub fn push_existing_scope(&mut self, id: HeapId, pos: &Position) -> Result<(), RaisedError> {
        if self.scopes.len() >= MAX_SCOPE_DEPTH {
            return Err(RaisedError::runtime("Scope stack overflow", pos));
        }
        self.heap.incref(id);
        self.scopes.push(id);
        Ok(())
    }

    /// Snapshot the current scope chain, incrementing each scope's
    /// refcount so a closure can hold onto it independent of how long the
    /// defining call frame lives.
    pub fn capture_scope_chain(&mut self) -> Vec<HeapId> {
        let ids = self.scopes.clone();
        for &id in &ids {
            self.heap.incref(id);
        }
        ids
    }

    /// Swap in a different scope chain (e.g. a function's closure for the
    /// duration of a call), returning the previous one so the caller can
    /// restore it afterward.
    pub fn set_scope_chain(&mut self, chain: Vec<HeapId>) -> Vec<HeapId> {
        std::mem::replace(&mut self.scopes, chain)
    }

    /// Search scopes top-to-bottom for `name`; returns the first hit.
    #[must_use]
    pub fn get_value(&self, name: &str) -> Option<Value> {
        let hash = hash_chars(&name.chars().collect::<Vec<_>>());
        for &scope in self.scopes.iter().rev() {
            if let HeapData::Map(map) = self.heap.get(scope) {
                if let Some(v) = map.get(&hash) {
                    return Some(*v);
                }
            }
        }
        None
    }

    /// Assign in the topmost scope, creating the binding if absent there.
    pub fn set_value(&mut self, name: &str, value: Value) {
        let hash = hash_chars(&name.chars().collect::<Vec<_>>());
        let top = *self.scopes.last().expect("scope stack never empty");
        let HeapData::Map(map) = self.heap.get_mut(top) else {
            unreachable!("scope slot is always a Map")
        };
        let old = map.insert(hash, value);
        self.heap.incref_value(value);
        if let Some(old) = old {
            self.heap.decref_value(old);
        }
    }

    /// Assign into a *specific* scope map by id, used when resolving a
    /// dotted `let` path that bottoms out at an object other than a scope.
    pub fn set_value_in(&mut self, scope: HeapId, name: &str, value: Value) {
        let hash = hash_chars(&name.chars().collect::<Vec<_>>());
        let HeapData::Map(map) = self.heap.get_mut(scope) else {
            unreachable!("expected a map")
        };
        let old = map.insert(hash, value);
        self.heap.incref_value(value);
        if let Some(old) = old {
            self.heap.decref_value(old);
        }
    }

    /// Resolve `include "path"` against the directory stack (cwd and
    /// stdlib by default); on first run of a given absolute path, push its
    /// parent directory for the duration of the run. Returns `None` if the
    /// file has already been included (so the caller treats it as a no-op).
    pub fn resolve_include(&mut self, rel_path: &str, pos: &Position) -> Result<Option<PathBuf>, RaisedError> {
        for dir in self.dirs.iter().rev() {
            let candidate = dir.join(rel_path);
            if candidate.is_file() {
                let absolute = candidate
                    .canonicalize()
                    .map_err(|e| RaisedError::runtime(format!("Failed to resolve include path: {e}"), pos))?;
                if self.included.contains(&absolute) {
                    return Ok(None);
                }
                self.included.insert(absolute.clone());
                return Ok(Some(absolute));
            }
        }
        Err(RaisedError::runtime(format!("Could not find file to include: '{rel_path}'"), pos))
    }

    pub fn push_dir(&mut self, dir: PathBuf, pos: &Position) -> Result<(), RaisedError> {
        if self.dirs.len() >= MAX_DIR_DEPTH {
            return Err(RaisedError::runtime("Include directory stack overflow", pos));
        }
        self.dirs.push(dir);
        Ok(())
    }

    pub fn pop_dir(&mut self) {
        self.dirs.pop();
    }

    /// Reserve a slot against the `MAX_OPEN_FILES` guard; `__module_os`'s
    /// `openFile` calls this before actually opening the file.
    pub fn reserve_open_file(&mut self, pos: &Position) -> Result<(), RaisedError> {
        if self.open_files >= MAX_OPEN_FILES {
            return Err(RaisedError::runtime("Too many open files", pos));
        }
        self.open_files += 1;
        Ok(())
    }

    /// Release a slot reserved by [`Self::reserve_open_file`]; `closeFile`
    /// calls this. Saturates so a double-close can't underflow the count.
    pub fn release_open_file(&mut self) {
        self.open_files = self.open_files.saturating_sub(1);
    }

    #[must_use]
    pub fn dir_of(path: &Path) -> PathBuf {
        path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
    }
}

pub fn intern(s: &str) -> Rc<str> {
    Rc::from(s)
}

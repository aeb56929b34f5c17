//! Scoped memory.
//!
//! Every path starts with a scope name:
//!
//! | Scope          | Lifetime                                     |
//! |----------------|----------------------------------------------|
//! | `settings`     | process wide, read-only                      |
//! | `user`         | persisted per user                           |
//! | `conversation` | persisted per conversation                   |
//! | `turn`         | discarded when the turn ends                 |
//! | `dialog`       | state of the nearest enclosing container     |
//!
//! Two shorthands are supported: `$name` is `dialog.name`, and `^name` walks
//! outward through the enclosing containers and binds to the nearest one whose
//! state defines `name`.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut memory = turn.memory_mut_view();
//! memory.set_value("user.todos", json!(["milk"]))?;
//! assert_eq!(memory.get_value("USER.Todos[0]"), Some(json!("milk")));
//! ```

pub mod path;

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::trace;

use crate::error::{MemoryError, MemoryResult};
use crate::value::ValueExt;

pub use path::{PathSegment, parse_path};

/// Scope names.
pub mod scope {
    /// Read-only process settings.
    pub const SETTINGS: &str = "settings";
    /// Per-user persisted state.
    pub const USER: &str = "user";
    /// Per-conversation persisted state.
    pub const CONVERSATION: &str = "conversation";
    /// Per-turn scratch state.
    pub const TURN: &str = "turn";
    /// State of the nearest enclosing container dialog.
    pub const DIALOG: &str = "dialog";
}

// =============================================================================
// Read contract
// =============================================================================

/// Read access to memory, as seen by expression evaluation.
pub trait MemoryRead {
    /// Returns the value at `path`, or `None` if any segment is missing.
    ///
    /// Malformed paths also read as `None`.
    fn get_value(&self, path: &str) -> Option<Value>;

    /// Returns `true` if a value is present at `path`.
    fn has_value(&self, path: &str) -> bool {
        self.get_value(path).is_some()
    }
}

/// A plain JSON object can serve as memory: its top-level members are the
/// scopes. `$name` reads `dialog.name`; `^name` is treated the same way.
impl MemoryRead for Value {
    fn get_value(&self, path: &str) -> Option<Value> {
        let path = path.trim();
        let segments = match path.strip_prefix(['$', '^']) {
            Some(rest) => {
                let mut segments = vec![PathSegment::Key(scope::DIALOG.to_owned())];
                segments.extend(parse_path(rest).ok()?);
                segments
            }
            None => parse_path(path).ok()?,
        };
        path::get(self, &segments).cloned()
    }
}

// =============================================================================
// Stores
// =============================================================================

/// The backing values of every scope for one turn.
///
/// `dialogs` is the dialog state document: `{"stack": [instance, ...]}` with
/// the active instance at index 0. Container dialogs nest their own stacks
/// inside their instance state; contexts address them by JSON pointer.
#[derive(Debug, Clone)]
pub struct MemoryStores {
    /// Read-only settings shared by all turns.
    pub settings: Arc<Value>,
    /// User scope.
    pub user: Value,
    /// Conversation scope.
    pub conversation: Value,
    /// Turn scope.
    pub turn: Value,
    /// Dialog state document.
    pub dialogs: Value,
}

impl Default for MemoryStores {
    fn default() -> Self {
        Self {
            settings: Arc::new(json!({})),
            user: json!({}),
            conversation: json!({}),
            turn: json!({}),
            dialogs: json!({ "stack": [] }),
        }
    }
}

enum ScopeRef<'p> {
    Settings,
    User,
    Conversation,
    Turn,
    /// JSON pointer of the dialog instance whose state is addressed.
    Dialog(&'p str),
}

struct Resolved<'p> {
    scope: ScopeRef<'p>,
    segments: Vec<PathSegment>,
}

fn instance_state<'v>(dialogs: &'v Value, pointer: &str) -> Option<&'v Value> {
    dialogs.pointer(pointer)?.get("state")
}

/// Resolves `path` against the stores. `Ok(None)` means the path cannot be
/// bound for reading; writes turn those cases into errors.
fn resolve<'p>(
    stores: &MemoryStores,
    dialog_scopes: &'p [String],
    path: &str,
    write: bool,
) -> MemoryResult<Option<Resolved<'p>>> {
    let path = path.trim();

    if let Some(rest) = path.strip_prefix('$') {
        let segments = parse_path(rest)?;
        return match dialog_scopes.first() {
            Some(pointer) => Ok(Some(Resolved {
                scope: ScopeRef::Dialog(pointer),
                segments,
            })),
            None if write => Err(MemoryError::NoDialogScope(path.to_owned())),
            None => Ok(None),
        };
    }

    if let Some(rest) = path.strip_prefix('^') {
        let segments = parse_path(rest)?;
        let Some(name) = segments.first().and_then(PathSegment::as_key) else {
            return Err(MemoryError::invalid_path(path, "'^' must be followed by a name"));
        };
        let bound = dialog_scopes.iter().find(|pointer| {
            instance_state(&stores.dialogs, pointer).is_some_and(|state| state.get_ci(name).is_some())
        });
        return match bound {
            Some(pointer) => Ok(Some(Resolved {
                scope: ScopeRef::Dialog(pointer),
                segments,
            })),
            None if write => Err(MemoryError::UnboundReference(name.to_owned())),
            None => Ok(None),
        };
    }

    let mut segments = parse_path(path)?;
    let Some(PathSegment::Key(name)) = segments.first() else {
        return Err(MemoryError::invalid_path(path, "missing scope"));
    };
    let scope = match name.to_lowercase().as_str() {
        scope::SETTINGS => ScopeRef::Settings,
        scope::USER => ScopeRef::User,
        scope::CONVERSATION => ScopeRef::Conversation,
        scope::TURN => ScopeRef::Turn,
        scope::DIALOG => match dialog_scopes.first() {
            Some(pointer) => ScopeRef::Dialog(pointer),
            None if write => return Err(MemoryError::NoDialogScope(path.to_owned())),
            None => return Ok(None),
        },
        _ => return Err(MemoryError::UnknownScope(name.clone())),
    };
    segments.remove(0);
    Ok(Some(Resolved { scope, segments }))
}

fn read(stores: &MemoryStores, dialog_scopes: &[String], path: &str) -> Option<Value> {
    let resolved = match resolve(stores, dialog_scopes, path, false) {
        Ok(resolved) => resolved?,
        Err(err) => {
            trace!(path, error = %err, "Unresolvable memory read");
            return None;
        }
    };
    let root = match resolved.scope {
        ScopeRef::Settings => stores.settings.as_ref(),
        ScopeRef::User => &stores.user,
        ScopeRef::Conversation => &stores.conversation,
        ScopeRef::Turn => &stores.turn,
        ScopeRef::Dialog(pointer) => instance_state(&stores.dialogs, pointer)?,
    };
    path::get(root, &resolved.segments).cloned()
}

fn scope_root_mut<'s>(
    stores: &'s mut MemoryStores,
    scope: &ScopeRef<'_>,
    path: &str,
) -> MemoryResult<&'s mut Value> {
    match scope {
        ScopeRef::Settings => Err(MemoryError::ReadOnlyScope(scope::SETTINGS.to_owned())),
        ScopeRef::User => Ok(&mut stores.user),
        ScopeRef::Conversation => Ok(&mut stores.conversation),
        ScopeRef::Turn => Ok(&mut stores.turn),
        ScopeRef::Dialog(pointer) => {
            let instance = stores
                .dialogs
                .pointer_mut(pointer)
                .and_then(Value::as_object_mut)
                .ok_or_else(|| MemoryError::NoDialogScope(path.to_owned()))?;
            let state = instance.entry("state").or_insert_with(|| json!({}));
            if !state.is_object() {
                *state = json!({});
            }
            Ok(state)
        }
    }
}

// =============================================================================
// Views
// =============================================================================

/// Read-only view of memory from one dialog context.
pub struct MemoryView<'a> {
    stores: &'a MemoryStores,
    dialog_scopes: Vec<String>,
}

impl<'a> MemoryView<'a> {
    /// Creates a view. `dialog_scopes` lists instance pointers nearest first.
    pub fn new(stores: &'a MemoryStores, dialog_scopes: Vec<String>) -> Self {
        Self {
            stores,
            dialog_scopes,
        }
    }
}

impl MemoryRead for MemoryView<'_> {
    fn get_value(&self, path: &str) -> Option<Value> {
        read(self.stores, &self.dialog_scopes, path)
    }
}

/// Read-write view of memory from one dialog context.
pub struct DialogMemory<'a> {
    stores: &'a mut MemoryStores,
    dialog_scopes: Vec<String>,
}

impl<'a> DialogMemory<'a> {
    /// Creates a view. `dialog_scopes` lists instance pointers nearest first.
    pub fn new(stores: &'a mut MemoryStores, dialog_scopes: Vec<String>) -> Self {
        Self {
            stores,
            dialog_scopes,
        }
    }

    /// Borrows a read-only view.
    pub fn view(&self) -> MemoryView<'_> {
        MemoryView::new(self.stores, self.dialog_scopes.clone())
    }

    /// Writes `value` at `path`, creating intermediate objects.
    ///
    /// Fails for `settings`, unknown scopes, unbound `^` names and `dialog`
    /// paths without an active dialog.
    pub fn set_value(&mut self, path: &str, value: Value) -> MemoryResult<()> {
        let resolved = resolve(self.stores, &self.dialog_scopes, path, true)?
            .ok_or_else(|| MemoryError::NoDialogScope(path.to_owned()))?;
        if resolved.segments.is_empty() {
            return Err(MemoryError::invalid_path(path, "cannot replace a whole scope"));
        }
        trace!(path, "Memory write");
        let root = scope_root_mut(self.stores, &resolved.scope, path)?;
        path::set(root, &resolved.segments, value);
        Ok(())
    }

    /// Removes the value at `path`, returning it if it existed.
    pub fn remove_value(&mut self, path: &str) -> MemoryResult<Option<Value>> {
        let Some(resolved) = resolve(self.stores, &self.dialog_scopes, path, false)? else {
            return Ok(None);
        };
        if resolved.segments.is_empty() {
            return Err(MemoryError::invalid_path(path, "cannot remove a whole scope"));
        }
        trace!(path, "Memory remove");
        let root = scope_root_mut(self.stores, &resolved.scope, path)?;
        Ok(path::remove(root, &resolved.segments))
    }
}

impl MemoryRead for DialogMemory<'_> {
    fn get_value(&self, path: &str) -> Option<Value> {
        read(self.stores, &self.dialog_scopes, path)
    }
}

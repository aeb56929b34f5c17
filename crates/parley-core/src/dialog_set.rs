//! Registries of dialogs addressable by id.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use crate::dialog::Dialog;
use crate::error::{DialogError, DialogResult};

/// Dialogs that may run on one stack.
///
/// Adding a dialog also adds its [`dependencies`](Dialog::dependencies),
/// recursively. Registering the same `Arc` twice is a no-op; a different
/// dialog under an existing id is an error.
#[derive(Clone, Default)]
pub struct DialogSet {
    dialogs: BTreeMap<String, Arc<dyn Dialog>>,
}

impl DialogSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `dialog` and its dependencies.
    pub fn add(&mut self, dialog: Arc<dyn Dialog>) -> DialogResult<()> {
        let mut pending = vec![dialog];
        while let Some(dialog) = pending.pop() {
            let id = dialog.id().to_owned();
            if let Some(existing) = self.dialogs.get(&id) {
                if Arc::ptr_eq(existing, &dialog) {
                    continue;
                }
                return Err(DialogError::DuplicateDialogId(id));
            }
            trace!(dialog = %id, "Registering dialog");
            pending.extend(dialog.dependencies());
            self.dialogs.insert(id, dialog);
        }
        Ok(())
    }

    /// Builder-style [`add`](Self::add).
    pub fn with(mut self, dialog: Arc<dyn Dialog>) -> DialogResult<Self> {
        self.add(dialog)?;
        Ok(self)
    }

    /// Looks up a dialog by id.
    pub fn find(&self, id: &str) -> Option<Arc<dyn Dialog>> {
        self.dialogs.get(id).cloned()
    }

    /// Returns `true` if `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.dialogs.contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.dialogs.keys().map(String::as_str)
    }

    /// Number of registered dialogs.
    pub fn len(&self) -> usize {
        self.dialogs.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.dialogs.is_empty()
    }
}

impl std::fmt::Debug for DialogSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::DialogTurnResult;
    use crate::dialog_context::DialogContext;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Named {
        id: &'static str,
        deps: Vec<Arc<dyn Dialog>>,
    }

    #[async_trait]
    impl Dialog for Named {
        fn id(&self) -> &str {
            self.id
        }

        async fn begin_dialog(
            &self,
            dc: &mut DialogContext<'_>,
            _options: Option<Value>,
        ) -> DialogResult<DialogTurnResult> {
            dc.end_dialog(None).await
        }

        fn dependencies(&self) -> Vec<Arc<dyn Dialog>> {
            self.deps.clone()
        }
    }

    fn named(id: &'static str) -> Arc<dyn Dialog> {
        Arc::new(Named { id, deps: vec![] })
    }

    #[test]
    fn test_dependencies_are_registered() {
        let leaf = named("leaf");
        let root: Arc<dyn Dialog> = Arc::new(Named {
            id: "root",
            deps: vec![leaf.clone(), leaf],
        });
        let set = DialogSet::new().with(root).unwrap();
        assert_eq!(set.ids().collect::<Vec<_>>(), ["leaf", "root"]);
    }

    #[test]
    fn test_same_instance_twice_is_noop() {
        let dialog = named("a");
        let mut set = DialogSet::new();
        set.add(dialog.clone()).unwrap();
        set.add(dialog).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let mut set = DialogSet::new();
        set.add(named("a")).unwrap();
        assert_eq!(
            set.add(named("a")).unwrap_err(),
            DialogError::DuplicateDialogId("a".into())
        );
    }
}

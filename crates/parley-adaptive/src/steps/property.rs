use async_trait::async_trait;
use parley_core::expression::values_equal;
use parley_core::{Dialog, DialogContext, DialogResult, DialogTurnResult, MemoryRead};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{evaluate_optional, step_id};
use crate::sequence::SequenceContext;

/// Writes the value of an expression to a property.
///
/// A value expression that fails or yields `null` removes the property.
#[derive(Debug, Clone)]
pub struct SetProperty {
    id: String,
    property: String,
    value: String,
}

impl SetProperty {
    /// Sets `property` to the value of `value`.
    pub fn new(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: step_id("SetProperty"),
            property: property.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl Dialog for SetProperty {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let value = evaluate_optional(dc, &self.id, Some(&self.value));
        let mut memory = dc.state();
        match value {
            Some(value) => memory.set_value(&self.property, value)?,
            None => {
                memory.remove_value(&self.property)?;
            }
        }
        dc.end_dialog(None).await
    }
}

/// Removes a property. Only valid inside an adaptive dialog's sequence.
#[derive(Debug, Clone)]
pub struct DeleteProperty {
    id: String,
    property: String,
}

impl DeleteProperty {
    /// Removes `property`.
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            id: step_id("DeleteProperty"),
            property: property.into(),
        }
    }
}

#[async_trait]
impl Dialog for DeleteProperty {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        SequenceContext::require(dc, &self.id)?;
        let removed = dc.state().remove_value(&self.property)?;
        debug!(step = %self.id, property = %self.property, removed = removed.is_some(), "Deleted property");
        dc.end_dialog(None).await
    }
}

/// Array edit performed by [`EditArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayChange {
    /// Append the value. Result: the new length.
    Push,
    /// Remove the last item. Result: the removed item.
    Pop,
    /// Remove the first item. Result: the removed item.
    Take,
    /// Remove the first item equal to the value. Result: whether one was removed.
    Remove,
    /// Remove every item. Result: whether there was anything to remove.
    Clear,
}

/// Edits an array property.
///
/// A missing property behaves as an empty array; it is only created by
/// [`ArrayChange::Push`].
#[derive(Debug, Clone)]
pub struct EditArray {
    id: String,
    change: ArrayChange,
    items_property: String,
    value: Option<String>,
    result_property: Option<String>,
}

impl EditArray {
    /// An edit of `items_property`.
    pub fn new(change: ArrayChange, items_property: impl Into<String>) -> Self {
        Self {
            id: step_id("EditArray"),
            change,
            items_property: items_property.into(),
            value: None,
            result_property: None,
        }
    }

    /// Appends the value of `value`.
    pub fn push(items_property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(ArrayChange::Push, items_property).value(value)
    }

    /// Removes the first item equal to the value of `value`.
    pub fn remove(items_property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(ArrayChange::Remove, items_property).value(value)
    }

    /// Sets the value expression.
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Stores the edit's result in `property`.
    pub fn result_property(mut self, property: impl Into<String>) -> Self {
        self.result_property = Some(property.into());
        self
    }

    fn apply(&self, items: &mut Vec<Value>, value: Option<Value>) -> Value {
        match self.change {
            ArrayChange::Push => {
                if let Some(value) = value {
                    items.push(value);
                }
                Value::from(items.len())
            }
            ArrayChange::Pop => items.pop().unwrap_or(Value::Null),
            ArrayChange::Take => {
                if items.is_empty() {
                    Value::Null
                } else {
                    items.remove(0)
                }
            }
            ArrayChange::Remove => {
                let position = value
                    .and_then(|value| items.iter().position(|item| values_equal(item, &value)));
                if let Some(position) = position {
                    items.remove(position);
                }
                Value::Bool(position.is_some())
            }
            ArrayChange::Clear => {
                let had_items = !items.is_empty();
                items.clear();
                Value::Bool(had_items)
            }
        }
    }
}

#[async_trait]
impl Dialog for EditArray {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let value = evaluate_optional(dc, &self.id, self.value.as_deref());
        let mut memory = dc.state();
        let existing = memory.get_value(&self.items_property);
        let mut items = match &existing {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.clone()],
        };
        let before = items.len();
        let result = self.apply(&mut items, value);
        if existing.is_some() || items.len() != before {
            memory.set_value(&self.items_property, Value::Array(items))?;
        }
        if let Some(property) = &self.result_property {
            memory.set_value(property, result.clone())?;
        }
        debug!(step = %self.id, change = ?self.change, property = %self.items_property, "Edited array");
        dc.end_dialog(Some(result)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::AdaptiveDialog;
    use crate::steps::SendActivity;
    use crate::testing::Harness;
    use parley_core::{Activity, DialogError};
    use serde_json::json;

    fn edit(change: ArrayChange, items: Value, value: Option<Value>) -> (Value, Value) {
        let mut items: Vec<Value> = serde_json::from_value(items).unwrap();
        let result = EditArray::new(change, "user.todos").apply(&mut items, value);
        (Value::Array(items), result)
    }

    #[test]
    fn test_array_changes() {
        let list = json!(["a", "b", "c"]);
        assert_eq!(
            edit(ArrayChange::Push, list.clone(), Some(json!("d"))),
            (json!(["a", "b", "c", "d"]), json!(4))
        );
        assert_eq!(edit(ArrayChange::Pop, list.clone(), None), (json!(["a", "b"]), json!("c")));
        assert_eq!(edit(ArrayChange::Take, list.clone(), None), (json!(["b", "c"]), json!("a")));
        assert_eq!(
            edit(ArrayChange::Remove, list.clone(), Some(json!("b"))),
            (json!(["a", "c"]), json!(true))
        );
        assert_eq!(
            edit(ArrayChange::Remove, list.clone(), Some(json!("z"))),
            (list.clone(), json!(false))
        );
        assert_eq!(edit(ArrayChange::Clear, list, None), (json!([]), json!(true)));
    }

    #[test]
    fn test_remove_matches_numbers_by_value() {
        assert_eq!(
            edit(ArrayChange::Remove, json!([1, 2.0, 3]), Some(json!(2))),
            (json!([1, 3]), json!(true))
        );
        assert_eq!(
            edit(ArrayChange::Remove, json!([1.5]), Some(json!(1))),
            (json!([1.5]), json!(false))
        );
    }

    #[test]
    fn test_empty_array_is_safe() {
        for change in [ArrayChange::Pop, ArrayChange::Take] {
            assert_eq!(edit(change, json!([]), None), (json!([]), Value::Null));
        }
        assert_eq!(edit(ArrayChange::Clear, json!([]), None), (json!([]), json!(false)));
        assert_eq!(edit(ArrayChange::Remove, json!([]), None), (json!([]), json!(false)));
    }

    #[tokio::test]
    async fn test_todo_list_edits() {
        let root = AdaptiveDialog::builder("root")
            .step(EditArray::push("user.todos", "'milk'"))
            .step(EditArray::push("user.todos", "'eggs'"))
            .step(EditArray::push("user.todos", "'bread'"))
            .step(EditArray::push("user.todos", "'jam'"))
            .step(EditArray::new(ArrayChange::Pop, "user.todos").result_property("dialog.popped"))
            .step(EditArray::new(ArrayChange::Take, "user.todos").result_property("dialog.taken"))
            .step(EditArray::remove("user.todos", "'eggs'").result_property("dialog.removed"))
            .step(SendActivity::new(
                "{dialog.popped}/{dialog.taken}/{dialog.removed}/{join(user.todos, ',')}",
            ))
            .step(EditArray::new(ArrayChange::Clear, "user.todos"))
            .build()
            .unwrap();
        let mut harness = Harness::new(root);
        assert_eq!(harness.send("go").await, ["jam/milk/true/bread"]);
        assert_eq!(harness.user()["todos"], json!([]));
    }

    #[tokio::test]
    async fn test_absent_array_stays_absent() {
        let root = AdaptiveDialog::builder("root")
            .step(EditArray::new(ArrayChange::Pop, "user.todos").result_property("user.last"))
            .step(EditArray::new(ArrayChange::Clear, "user.todos"))
            .build()
            .unwrap();
        let mut harness = Harness::new(root);
        harness.send("go").await;
        assert!(harness.user().get("todos").is_none());
        assert_eq!(harness.user()["last"], Value::Null);
    }

    #[tokio::test]
    async fn test_set_and_delete_property() {
        let root = AdaptiveDialog::builder("root")
            .step(SetProperty::new("user.name", "'Ann'"))
            .step(SetProperty::new("user.age", "30 + 1"))
            .step(SetProperty::new("user.nick", "nope("))
            .step(DeleteProperty::new("user.name"))
            .build()
            .unwrap();
        let mut harness = Harness::new(root);
        harness.send("go").await;
        assert_eq!(harness.user(), &json!({ "age": 31 }));
    }

    #[tokio::test]
    async fn test_delete_property_requires_sequence() {
        let mut harness = Harness::new(DeleteProperty::new("user.name"));
        let err = harness.turn(Activity::message("go")).await.unwrap_err();
        assert!(matches!(err, DialogError::NotInSequence { .. }));
    }
}

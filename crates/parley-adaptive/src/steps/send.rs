use async_trait::async_trait;
use parley_core::{Dialog, DialogContext, DialogResult, DialogTurnResult};
use serde_json::Value;
use tracing::info;

use super::{render, step_id};

/// Renders a template and sends the text as a reply.
#[derive(Debug, Clone)]
pub struct SendActivity {
    id: String,
    template: String,
}

impl SendActivity {
    /// Sends `template`, rendered against memory.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            id: step_id("SendActivity"),
            template: template.into(),
        }
    }
}

#[async_trait]
impl Dialog for SendActivity {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let text = render(dc, &self.template)?;
        dc.turn_mut().send_text(text);
        dc.end_dialog(None).await
    }
}

/// Renders a template into the `parley::log` tracing target.
#[derive(Debug, Clone)]
pub struct LogStep {
    id: String,
    template: String,
    label: Option<String>,
}

impl LogStep {
    /// Logs `template`, rendered against memory.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            id: step_id("LogStep"),
            template: template.into(),
            label: None,
        }
    }

    /// Adds a label field to the log record.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[async_trait]
impl Dialog for LogStep {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let text = render(dc, &self.template)?;
        info!(
            target: "parley::log",
            step = %self.id,
            label = self.label.as_deref().unwrap_or_default(),
            "{text}"
        );
        dc.end_dialog(Some(Value::String(text))).await
    }
}

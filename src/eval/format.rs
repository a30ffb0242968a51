use serde::{Deserialize, Serialize};

use super::environment::{EventFrame, ExecEnvironment};
use super::RuntimeResult;

/// How the caller intends to present a formatted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum FormatHint {
    /// A single line of plain text.
    String,
    /// Structured chunks for a messaging surface.
    Messaging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FormattedEvent {
    Text(String),
    Picture(String),
    Rdl {
        display_title: String,
        web_callback: String,
    },
}

impl FormattedEvent {
    fn to_plain_text(&self) -> String {
        match self {
            FormattedEvent::Text(text) => text.clone(),
            FormattedEvent::Picture(url) => format!("Picture: {}", url),
            FormattedEvent::Rdl {
                display_title,
                web_callback,
            } => format!("Link: {} <{}>", display_title, web_callback),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormattedOutput {
    Text(String),
    Messages(Vec<FormattedEvent>),
}

impl FormattedOutput {
    pub(crate) fn from_chunks(chunks: Vec<FormattedEvent>, hint: FormatHint) -> Self {
        match hint {
            FormatHint::String => FormattedOutput::Text(
                chunks
                    .iter()
                    .map(FormattedEvent::to_plain_text)
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            FormatHint::Messaging => FormattedOutput::Messages(chunks),
        }
    }
}

/// Renders the events of one kind for humans.
pub trait EventFormatter: Send + Sync {
    fn format(
        &self,
        event: &EventFrame,
        hint: FormatHint,
        env: &ExecEnvironment,
    ) -> RuntimeResult<Vec<FormattedEvent>>;
}

/// Used for kinds without a registered formatter: lists the event values.
#[derive(Debug, Default)]
pub struct DefaultFormatter;

impl EventFormatter for DefaultFormatter {
    fn format(
        &self,
        event: &EventFrame,
        _hint: FormatHint,
        env: &ExecEnvironment,
    ) -> RuntimeResult<Vec<FormattedEvent>> {
        let values: Vec<String> = event
            .values
            .iter()
            .map(|value| env.format_value(value))
            .collect();
        Ok(vec![FormattedEvent::Text(values.join(", "))])
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;

use crate::ast::{format_number, Value};
use crate::config::CompilerConfig;
use crate::typed_ast::ChannelRef;
use crate::types::units;

use super::format::{DefaultFormatter, EventFormatter, FormatHint, FormattedOutput};
use super::{RuntimeError, RuntimeResult};

/// Access to the keyword cells owned by the engine.
#[derive(Clone)]
pub enum KeywordAccess {
    ReadOnly(Arc<DashMap<String, Value>>),
    ReadWrite(Arc<DashMap<String, Value>>),
}

impl Default for KeywordAccess {
    fn default() -> Self {
        KeywordAccess::ReadOnly(Arc::new(DashMap::new()))
    }
}

impl KeywordAccess {
    pub fn read(&self, key: &str) -> RuntimeResult<Value> {
        match self {
            KeywordAccess::ReadOnly(cells) | KeywordAccess::ReadWrite(cells) => cells
                .get(key)
                .map(|v| v.clone())
                .ok_or_else(|| RuntimeError::UnknownKeyword(key.to_string())),
        }
    }

    pub fn write(&self, key: &str, value: Value) -> RuntimeResult<()> {
        match self {
            KeywordAccess::ReadWrite(cells) => {
                cells.insert(key.to_string(), value);
                Ok(())
            }
            KeywordAccess::ReadOnly(_) => Err(RuntimeError::ReadOnlyKeyword(key.to_string())),
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        match self {
            KeywordAccess::ReadOnly(cells) | KeywordAccess::ReadWrite(cells) => {
                cells.contains_key(key)
            }
        }
    }
}

/// The raw values of one fired trigger or one query result.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    pub channel: ChannelRef,
    pub values: Vec<Value>,
}

impl EventFrame {
    pub fn new(channel: ChannelRef, values: Vec<Value>) -> Self {
        Self { channel, values }
    }

    pub fn get(&self, index: usize) -> RuntimeResult<&Value> {
        self.values
            .get(index)
            .ok_or_else(|| RuntimeError::MissingEventProperty {
                channel: self.channel.to_string(),
                index,
            })
    }
}

/// Runtime state of one activation: one trigger firing or one command run.
///
/// Cloning shares parameters, keyword cells and formatters but gives the
/// clone its own local scope, so fan-out branches never see each other's
/// bindings.
#[derive(Clone)]
pub struct ExecEnvironment {
    locale: String,
    timezone: FixedOffset,
    params: Arc<HashMap<String, Value>>,
    keywords: KeywordAccess,
    formatters: Arc<HashMap<String, Arc<dyn EventFormatter>>>,
    default_formatter: Arc<dyn EventFormatter>,
    scope: HashMap<String, Value>,
    trigger: Option<EventFrame>,
    query: Option<EventFrame>,
    query_input: Option<Vec<Value>>,
}

impl fmt::Debug for ExecEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecEnvironment")
            .field("locale", &self.locale)
            .field("timezone", &self.timezone)
            .field("scope", &self.scope)
            .field("trigger", &self.trigger)
            .field("query", &self.query)
            .finish()
    }
}

impl Default for ExecEnvironment {
    fn default() -> Self {
        Self::from_config(&CompilerConfig::default())
    }
}

impl ExecEnvironment {
    pub fn new<S: Into<String>>(locale: S, timezone: FixedOffset) -> Self {
        Self {
            locale: locale.into(),
            timezone,
            params: Arc::new(HashMap::new()),
            keywords: KeywordAccess::default(),
            formatters: Arc::new(HashMap::new()),
            default_formatter: Arc::new(DefaultFormatter),
            scope: HashMap::new(),
            trigger: None,
            query: None,
            query_input: None,
        }
    }

    pub fn from_config(config: &CompilerConfig) -> Self {
        Self::new(config.locale.clone(), config.timezone())
    }

    pub fn with_params(mut self, params: HashMap<String, Value>) -> Self {
        self.params = Arc::new(params);
        self
    }

    pub fn with_keywords(mut self, keywords: KeywordAccess) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_formatters(mut self, formatters: HashMap<String, Arc<dyn EventFormatter>>) -> Self {
        self.formatters = Arc::new(formatters);
        self
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn timezone(&self) -> FixedOffset {
        self.timezone
    }

    // local scope

    pub fn read_var(&self, name: &str) -> RuntimeResult<Value> {
        self.scope
            .get(name)
            .or_else(|| self.params.get(name))
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownVariable(name.to_string()))
    }

    pub fn set_var(&mut self, name: &str, value: Value) {
        self.scope.insert(name.to_string(), value);
    }

    pub fn reset_scope(&mut self) {
        self.scope.clear();
    }

    // keywords

    pub fn read_keyword(&self, name: &str) -> RuntimeResult<Value> {
        self.keywords.read(name)
    }

    pub fn write_keyword(&self, name: &str, value: Value) -> RuntimeResult<()> {
        self.keywords.write(name, value)
    }

    // events

    pub fn set_trigger_event(&mut self, event: EventFrame) {
        self.trigger = Some(event);
    }

    /// Records a query result along with the inputs it was invoked with.
    pub fn set_query_event(&mut self, input: Vec<Value>, event: EventFrame) {
        self.query_input = Some(input);
        self.query = Some(event);
    }

    pub fn clear_query_event(&mut self) {
        self.query_input = None;
        self.query = None;
    }

    pub fn trigger_event(&self) -> Option<&EventFrame> {
        self.trigger.as_ref()
    }

    pub fn query_event(&self) -> Option<&EventFrame> {
        self.query.as_ref()
    }

    pub fn query_input(&self) -> Option<&[Value]> {
        self.query_input.as_deref()
    }

    /// The most recent event: the current query result, else the trigger.
    pub fn current_event(&self) -> RuntimeResult<&EventFrame> {
        self.query
            .as_ref()
            .or(self.trigger.as_ref())
            .ok_or(RuntimeError::NoEvent)
    }

    pub fn format_event(&self, hint: FormatHint) -> RuntimeResult<FormattedOutput> {
        let event = self.current_event()?;
        let formatter = self
            .formatters
            .get(&event.channel.kind)
            .unwrap_or(&self.default_formatter);
        let chunks = formatter.format(event, hint, self)?;
        Ok(FormattedOutput::from_chunks(chunks, hint))
    }

    // locale aware formatting

    fn uses_us_conventions(&self) -> bool {
        self.locale.starts_with("en-US") || self.locale == "en"
    }

    pub fn format_date(&self, date: &DateTime<Utc>) -> String {
        let local = date.with_timezone(&self.timezone);
        if self.uses_us_conventions() {
            local.format("%m/%d/%Y, %-I:%M %p").to_string()
        } else {
            local.format("%Y-%m-%d %H:%M").to_string()
        }
    }

    pub fn format_time(&self, hour: u32, minute: u32) -> String {
        if self.uses_us_conventions() {
            let suffix = if hour < 12 { "AM" } else { "PM" };
            let hour12 = match hour % 12 {
                0 => 12,
                h => h,
            };
            format!("{}:{:02} {}", hour12, minute, suffix)
        } else {
            format!("{:02}:{:02}", hour, minute)
        }
    }

    /// Formats a base-unit magnitude in `unit`.
    pub fn format_measure(&self, value: f64, unit: &str) -> RuntimeResult<String> {
        let converted = units::transform_from_base(value, unit)
            .ok_or_else(|| RuntimeError::Format(format!("unknown unit {}", unit)))?;
        let rounded = (converted * 10.0).round() / 10.0;
        Ok(format!("{} {}", format_number(rounded), unit))
    }

    pub fn format_value(&self, value: &Value) -> String {
        match value {
            Value::Date(date) => self.format_date(date),
            Value::Time { hour, minute } => self.format_time(*hour, *minute),
            Value::Measure { value, unit } => self
                .format_measure(*value, unit)
                .unwrap_or_else(|_| format!("{} {}", format_number(*value), unit)),
            Value::Array(items) => items
                .iter()
                .map(|item| self.format_value(item))
                .collect::<Vec<_>>()
                .join(", "),
            other => other.to_string(),
        }
    }
}

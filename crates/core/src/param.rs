//! Typed parameters shared by jobs and tasks.

use serde::{Deserialize, Serialize};

/// Declared type of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// Free text
    #[default]
    String,
    /// Decimal number
    Number,
    /// true / false
    Boolean,
}

/// Namespace a parameter token resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamScope {
    /// Process-wide configuration
    System,
    /// The task's own params
    #[serde(rename = "self")]
    SelfScope,
    /// Job inputs
    Job,
    /// Another task's params, addressed by task code
    #[default]
    Task,
}

impl ParamScope {
    /// Token prefix for this scope.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamScope::System => "system",
            ParamScope::SelfScope => "self",
            ParamScope::Job => "job",
            ParamScope::Task => "task",
        }
    }
}

/// A resolved scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean value
    Bool(bool),
    /// Numeric value
    Number(f64),
    /// Text value
    Text(String),
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        ParamValue::Number(n)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// A named, typed parameter attached to a job or a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Param {
    /// Declared value type
    #[serde(rename = "type", default)]
    pub param_type: ParamType,

    /// Scope tag
    #[serde(default)]
    pub scope: ParamScope,

    /// Opaque reference tag
    #[serde(rename = "ref", default)]
    pub reference: String,

    /// JSON path in a task response; non-empty marks an output param
    #[serde(default)]
    pub field: String,

    /// Lookup name
    pub key: String,

    /// Unset until supplied at job creation or extracted from a response
    #[serde(default)]
    pub value: Option<ParamValue>,
}

impl Param {
    /// Create an unset parameter.
    pub fn new(key: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            key: key.into(),
            param_type,
            ..Default::default()
        }
    }

    /// Set the value.
    pub fn with_value(mut self, value: impl Into<ParamValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Set the response field this parameter is extracted from.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    /// Set the scope tag.
    pub fn with_scope(mut self, scope: ParamScope) -> Self {
        self.scope = scope;
        self
    }

    /// Whether this parameter is filled from a task response.
    pub fn is_output(&self) -> bool {
        !self.field.is_empty()
    }

    /// Canonical text form used for substitution.
    ///
    /// Unset values and values that do not match the declared type render
    /// as an empty string.
    pub fn render(&self) -> String {
        match (&self.value, self.param_type) {
            (Some(ParamValue::Text(s)), ParamType::String) => s.clone(),
            (Some(ParamValue::Bool(b)), ParamType::Boolean) => b.to_string(),
            (Some(ParamValue::Number(n)), ParamType::Number) => n.to_string(),
            _ => String::new(),
        }
    }
}

/// First parameter with a matching key, rendered, or empty.
pub fn lookup(params: &[Param], key: &str) -> String {
    params
        .iter()
        .find(|p| p.key == key)
        .map(Param::render)
        .unwrap_or_default()
}

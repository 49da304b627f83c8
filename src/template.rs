// Parameterized rule templates.
//
// A template is a rule document with `{name}` placeholders. A string that
// is exactly one placeholder takes the parameter's JSON value (so numbers
// stay numbers); placeholders embedded in longer strings are replaced by
// the value's text.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{Result, RuleEngineError};
use crate::match_clause::stringify;
use crate::rule_metadata::Rule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    /// RFC 3339 timestamp or `YYYY-MM-DD`
    Date,
    Array,
}

impl ParameterType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Number => value.is_number(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Array => value.is_array(),
            ParameterType::Date => value.as_str().map_or(false, |s| {
                DateTime::parse_from_rfc3339(s).is_ok() || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl TemplateParameter {
    pub fn new(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: false,
            default_value: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A worked example shipped with a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateExample {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Rule document (camelCase JSON) containing `{param}` placeholders
    pub base_rule: Value,
    #[serde(default)]
    pub parameters: Vec<TemplateParameter>,
    #[serde(default)]
    pub examples: Vec<TemplateExample>,
}

impl RuleTemplate {
    pub fn placeholder(name: &str) -> String {
        format!("{{{}}}", name)
    }

    /// Supplied values merged with declared defaults, type-checked.
    pub fn resolve_parameters(&self, supplied: &BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>> {
        if let Some(unknown) = supplied
            .keys()
            .find(|name| !self.parameters.iter().any(|p| &p.name == *name))
        {
            return Err(self.error(format!("unknown parameter '{}'", unknown)));
        }

        let mut resolved = BTreeMap::new();
        for parameter in &self.parameters {
            let value = match supplied.get(&parameter.name).or(parameter.default_value.as_ref()) {
                Some(value) => value,
                None if parameter.required => {
                    return Err(self.error(format!("missing required parameter '{}'", parameter.name)));
                }
                None => continue,
            };
            if !parameter.param_type.accepts(value) {
                return Err(self.error(format!(
                    "parameter '{}' expects {:?}, got {}",
                    parameter.name, parameter.param_type, value
                )));
            }
            resolved.insert(parameter.name.clone(), value.clone());
        }
        Ok(resolved)
    }

    /// Build a draft rule from this template.
    ///
    /// Fields the base rule leaves out get draft defaults: a fresh id,
    /// `draft` status, effective now, authored by `created_by`. The rule is
    /// tagged `template:<id>`.
    pub fn instantiate(&self, supplied: &BTreeMap<String, Value>, created_by: &str) -> Result<Rule> {
        let parameters = self.resolve_parameters(supplied)?;
        let document = substitute(&self.base_rule, &parameters);

        let mut object = match document {
            Value::Object(object) => object,
            _ => return Err(self.error("base rule must be a JSON object")),
        };
        fill_draft_defaults(&mut object, created_by);

        let mut rule: Rule = serde_json::from_value(Value::Object(object))
            .map_err(|e| self.error(format!("instantiated rule is malformed: {}", e)))?;
        rule.tags.insert(format!("template:{}", self.id));
        Ok(rule)
    }

    fn error(&self, reason: impl Into<String>) -> RuleEngineError {
        RuleEngineError::Template {
            template_id: self.id.clone(),
            reason: reason.into(),
        }
    }
}

fn fill_draft_defaults(object: &mut Map<String, Value>, created_by: &str) {
    object
        .entry("id")
        .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
    object.entry("status").or_insert_with(|| Value::String("draft".to_string()));
    object
        .entry("effectiveDate")
        .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
    for author in ["createdBy", "updatedBy"] {
        object
            .entry(author)
            .or_insert_with(|| Value::String(created_by.to_string()));
    }
}

fn substitute(value: &Value, parameters: &BTreeMap<String, Value>) -> Value {
    match value {
        Value::String(s) => {
            for (name, replacement) in parameters {
                if *s == RuleTemplate::placeholder(name) {
                    return replacement.clone();
                }
            }
            let mut text = s.clone();
            for (name, replacement) in parameters {
                text = text.replace(&RuleTemplate::placeholder(name), &stringify(replacement));
            }
            Value::String(text)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, parameters)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, parameters)))
                .collect(),
        ),
        other => other.clone(),
    }
}

//! Document properties (`docProps/core.xml`, `docProps/app.xml`) and
//! user-defined custom properties (`docProps/custom.xml`).

use crate::types::XlsxError;
use crate::validation::MAX_PROPERTY_LEN;
use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::LazyLock;

/// Date format accepted for `created` and date-typed custom properties.
pub const PROPERTY_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

static INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").expect("static regex"));
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("static regex"));

/// Standard document properties. Unset fields are omitted from output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocProperties {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub author: Option<String>,
    pub manager: Option<String>,
    pub company: Option<String>,
    pub category: Option<String>,
    pub keywords: Option<String>,
    pub comments: Option<String>,
    pub status: Option<String>,
    pub hyperlink_base: Option<String>,
    pub created: Option<NaiveDateTime>,
}

impl DocProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property by key. Keys outside the known set are rejected.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), XlsxError> {
        let slot = match key {
            "title" => &mut self.title,
            "subject" => &mut self.subject,
            "author" => &mut self.author,
            "manager" => &mut self.manager,
            "company" => &mut self.company,
            "category" => &mut self.category,
            "keywords" => &mut self.keywords,
            "comments" => &mut self.comments,
            "status" => &mut self.status,
            "hyperlink_base" => &mut self.hyperlink_base,
            "created" => {
                self.created = Some(parse_date(value)?);
                return Ok(());
            }
            _ => {
                return Err(XlsxError::Validation(format!("Unknown document property '{}'", key)));
            }
        };
        *slot = Some(value.to_string());
        Ok(())
    }
}

fn parse_date(value: &str) -> Result<NaiveDateTime, XlsxError> {
    NaiveDateTime::parse_from_str(value, PROPERTY_DATE_FORMAT).map_err(|e| {
        XlsxError::Validation(format!(
            "Invalid date '{}', expected YYYY-MM-DDTHH:MM:SSZ: {}",
            value, e
        ))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomPropertyType {
    Text,
    Number,
    NumberInt,
    Bool,
    Date,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CustomValue {
    Text(String),
    Number(f64),
    NumberInt(i32),
    Bool(bool),
    Date(NaiveDateTime),
}

impl CustomValue {
    pub fn property_type(&self) -> CustomPropertyType {
        match self {
            CustomValue::Text(_) => CustomPropertyType::Text,
            CustomValue::Number(_) => CustomPropertyType::Number,
            CustomValue::NumberInt(_) => CustomPropertyType::NumberInt,
            CustomValue::Bool(_) => CustomPropertyType::Bool,
            CustomValue::Date(_) => CustomPropertyType::Date,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomProperty {
    pub name: String,
    pub value: CustomValue,
}

impl CustomProperty {
    /// Build a property, inferring the type from the text when `kind` is
    /// `None`: integer, then number, then boolean, then text.
    pub fn new(name: &str, value: &str, kind: Option<CustomPropertyType>) -> Result<Self, XlsxError> {
        if name.is_empty() {
            return Err(XlsxError::Validation("Custom property name must not be empty".to_string()));
        }
        if name.chars().count() > MAX_PROPERTY_LEN {
            return Err(XlsxError::Validation(format!(
                "Custom property name exceeds {} characters",
                MAX_PROPERTY_LEN
            )));
        }

        let kind = kind.unwrap_or_else(|| infer_type(value));
        let value = match kind {
            CustomPropertyType::Text => {
                if value.chars().count() > MAX_PROPERTY_LEN {
                    return Err(XlsxError::Validation(format!(
                        "Custom property '{}' value exceeds {} characters",
                        name, MAX_PROPERTY_LEN
                    )));
                }
                CustomValue::Text(value.to_string())
            }
            CustomPropertyType::NumberInt => value
                .trim()
                .parse::<i32>()
                .map(CustomValue::NumberInt)
                .map_err(|_| invalid_value(name, value, "an integer"))?,
            CustomPropertyType::Number => value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(CustomValue::Number)
                .ok_or_else(|| invalid_value(name, value, "a number"))?,
            CustomPropertyType::Bool => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => CustomValue::Bool(true),
                "false" | "0" => CustomValue::Bool(false),
                _ => return Err(invalid_value(name, value, "a boolean")),
            },
            CustomPropertyType::Date => CustomValue::Date(parse_date(value)?),
        };

        Ok(Self { name: name.to_string(), value })
    }
}

fn invalid_value(name: &str, value: &str, expected: &str) -> XlsxError {
    XlsxError::Validation(format!(
        "Custom property '{}' value '{}' is not {}",
        name, value, expected
    ))
}

fn infer_type(value: &str) -> CustomPropertyType {
    if INTEGER.is_match(value) && value.parse::<i32>().is_ok() {
        CustomPropertyType::NumberInt
    } else if NUMBER.is_match(value) {
        CustomPropertyType::Number
    } else if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
        CustomPropertyType::Bool
    } else {
        CustomPropertyType::Text
    }
}

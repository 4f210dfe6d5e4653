//! Parameter schema validation and auto-correction
//!
//! A lightweight JSON-Schema-style description of a capability's
//! parameters: per-parameter type, required flag, enum restriction,
//! numeric range, and string length bounds. Validation runs before
//! dispatch; auto-correction applies deterministic fixes (trimming,
//! path separator normalization, numeric coercion) so small model
//! formatting slips do not fail the directive.

use crate::errors::ExecError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Expected JSON type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// Any string
    String,

    /// A filesystem path (string, separator-normalized on correction)
    Path,

    /// Integer or float
    Number,

    /// true / false
    Boolean,

    /// JSON array
    Array,

    /// JSON object
    Object,
}

/// Schema for a single parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Expected type
    pub param_type: ParamType,

    /// Whether the parameter must be present
    #[serde(default)]
    pub required: bool,

    /// Allowed values (strings only); empty means unrestricted
    #[serde(default)]
    pub allowed: Vec<String>,

    /// Inclusive numeric range, when `param_type` is `Number`
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,

    /// String length bounds, when `param_type` is `String` or `Path`
    #[serde(default)]
    pub min_len: Option<usize>,
    #[serde(default)]
    pub max_len: Option<usize>,
}

impl ParamSpec {
    /// A required parameter of the given type
    pub fn required(param_type: ParamType) -> Self {
        Self {
            param_type,
            required: true,
            allowed: Vec::new(),
            min: None,
            max: None,
            min_len: None,
            max_len: None,
        }
    }

    /// An optional parameter of the given type
    pub fn optional(param_type: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(param_type)
        }
    }

    /// Restrict to an enumerated set of string values
    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Restrict to an inclusive numeric range
    pub fn in_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Restrict string length
    pub fn length(mut self, min_len: usize, max_len: usize) -> Self {
        self.min_len = Some(min_len);
        self.max_len = Some(max_len);
        self
    }
}

/// Schema for a capability's parameter object.
///
/// Parameters are kept in a `BTreeMap` so validation errors are reported
/// in a stable order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSchema {
    /// Per-parameter specs, keyed by parameter name
    pub params: BTreeMap<String, ParamSpec>,
}

impl ParamSchema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter spec
    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.params.insert(name.into(), spec);
        self
    }

    /// Apply deterministic corrections to a parameter object in place.
    ///
    /// - trims leading/trailing whitespace from strings
    /// - normalizes `\` to `/` in `Path` parameters
    /// - coerces numeric strings where a number is expected
    ///
    /// Non-object values are left untouched; validation will reject them.
    pub fn correct(&self, params: &mut Value) {
        let Some(map) = params.as_object_mut() else {
            return;
        };

        for (name, spec) in &self.params {
            let Some(value) = map.get_mut(name) else {
                continue;
            };

            if let Value::String(s) = value {
                let mut fixed = s.trim().to_string();
                if spec.param_type == ParamType::Path {
                    fixed = fixed.replace('\\', "/");
                }
                if spec.param_type == ParamType::Number {
                    if let Ok(n) = fixed.parse::<f64>() {
                        if let Some(num) = serde_json::Number::from_f64(n) {
                            *value = Value::Number(num);
                            continue;
                        }
                    }
                }
                *value = Value::String(fixed);
            }
        }
    }

    /// Validate a parameter object against this schema.
    ///
    /// Checks required presence first, then type, enum, range, and length
    /// constraints. Unknown extra parameters are allowed and ignored.
    pub fn validate(&self, capability: &str, params: &Value) -> Result<(), ExecError> {
        let map = params.as_object().ok_or_else(|| ExecError::Validation {
            capability: capability.to_string(),
            reason: "parameters must be an object".to_string(),
        })?;

        for (name, spec) in &self.params {
            let value = match map.get(name) {
                Some(v) if !v.is_null() => v,
                _ => {
                    if spec.required {
                        return Err(ExecError::Validation {
                            capability: capability.to_string(),
                            reason: format!("missing required parameter '{}'", name),
                        });
                    }
                    continue;
                }
            };

            self.check_type(capability, name, spec, value)?;
            self.check_constraints(capability, name, spec, value)?;
        }

        Ok(())
    }

    fn check_type(
        &self,
        capability: &str,
        name: &str,
        spec: &ParamSpec,
        value: &Value,
    ) -> Result<(), ExecError> {
        let ok = match spec.param_type {
            ParamType::String | ParamType::Path => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        };
        if ok {
            Ok(())
        } else {
            Err(ExecError::Validation {
                capability: capability.to_string(),
                reason: format!("parameter '{}' has wrong type", name),
            })
        }
    }

    fn check_constraints(
        &self,
        capability: &str,
        name: &str,
        spec: &ParamSpec,
        value: &Value,
    ) -> Result<(), ExecError> {
        if !spec.allowed.is_empty() {
            let s = value.as_str().unwrap_or_default();
            if !spec.allowed.iter().any(|a| a == s) {
                return Err(ExecError::Validation {
                    capability: capability.to_string(),
                    reason: format!(
                        "parameter '{}' must be one of: {}",
                        name,
                        spec.allowed.join(", ")
                    ),
                });
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = spec.min {
                if n < min {
                    return Err(ExecError::Validation {
                        capability: capability.to_string(),
                        reason: format!("parameter '{}' below minimum {}", name, min),
                    });
                }
            }
            if let Some(max) = spec.max {
                if n > max {
                    return Err(ExecError::Validation {
                        capability: capability.to_string(),
                        reason: format!("parameter '{}' above maximum {}", name, max),
                    });
                }
            }
        }

        if let Some(s) = value.as_str() {
            if let Some(min_len) = spec.min_len {
                if s.chars().count() < min_len {
                    return Err(ExecError::Validation {
                        capability: capability.to_string(),
                        reason: format!("parameter '{}' shorter than {} chars", name, min_len),
                    });
                }
            }
            if let Some(max_len) = spec.max_len {
                if s.chars().count() > max_len {
                    return Err(ExecError::Validation {
                        capability: capability.to_string(),
                        reason: format!("parameter '{}' longer than {} chars", name, max_len),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file_schema() -> ParamSchema {
        ParamSchema::new()
            .param("path", ParamSpec::required(ParamType::Path).length(1, 512))
            .param("mode", ParamSpec::optional(ParamType::String).one_of(&["read", "write"]))
            .param("limit", ParamSpec::optional(ParamType::Number).in_range(1.0, 100.0))
    }

    #[test]
    fn test_validate_ok() {
        let schema = file_schema();
        let params = json!({"path": "src/main.rs", "mode": "read", "limit": 10});
        assert!(schema.validate("read_file", &params).is_ok());
    }

    #[test]
    fn test_missing_required() {
        let schema = file_schema();
        let err = schema.validate("read_file", &json!({})).unwrap_err();
        assert!(err.to_string().contains("path"));
    }

    #[test]
    fn test_wrong_type() {
        let schema = file_schema();
        let err = schema
            .validate("read_file", &json!({"path": 42}))
            .unwrap_err();
        assert!(err.to_string().contains("wrong type"));
    }

    #[test]
    fn test_enum_restriction() {
        let schema = file_schema();
        let err = schema
            .validate("read_file", &json!({"path": "x", "mode": "append"}))
            .unwrap_err();
        assert!(err.to_string().contains("one of"));
    }

    #[test]
    fn test_range_restriction() {
        let schema = file_schema();
        let err = schema
            .validate("read_file", &json!({"path": "x", "limit": 500}))
            .unwrap_err();
        assert!(err.to_string().contains("maximum"));
    }

    #[test]
    fn test_correct_trims_and_normalizes() {
        let schema = file_schema();
        let mut params = json!({"path": "  C:\\work\\file.txt  ", "mode": " read "});
        schema.correct(&mut params);
        assert_eq!(params["path"], "C:/work/file.txt");
        assert_eq!(params["mode"], "read");
    }

    #[test]
    fn test_correct_coerces_numeric_string() {
        let schema = file_schema();
        let mut params = json!({"path": "x", "limit": "42"});
        schema.correct(&mut params);
        assert!(params["limit"].is_number());
        assert!(schema.validate("read_file", &params).is_ok());
    }

    #[test]
    fn test_params_must_be_object() {
        let schema = file_schema();
        assert!(schema.validate("read_file", &json!("just a string")).is_err());
    }
}

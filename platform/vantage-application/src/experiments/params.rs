use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(v) => f.write_str(v),
        }
    }
}

/// One candidate assignment: parameter name to typed value, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(BTreeMap<String, ParamValue>);

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) -> Option<ParamValue> {
        self.0.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParamValue::as_int)
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ParamValue::as_float)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ParamValue::as_bool)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short stable hash of the canonical JSON form, used as a run id.
    pub fn fingerprint(&self) -> String {
        let canonical =
            serde_json::to_string(&self.0).unwrap_or_else(|_| "{\"error\":\"params\"}".to_string());
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let bytes = hasher.finalize();
        to_hex_short(&bytes[..], 12)
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

fn to_hex_short(bytes: &[u8], chars: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(chars);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        if out.len() >= chars {
            break;
        }
        out.push(HEX[(b & 0x0f) as usize] as char);
        if out.len() >= chars {
            break;
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Int,
    Float,
    Bool,
    String,
}

/// A searchable parameter: either a numeric `min`/`max`/`step` range or an explicit value list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<ParamValue>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Domain {
    IntRange { min: i64, max: i64, step: i64 },
    FloatRange { min: f64, max: f64, step: f64 },
    Values(Vec<ParamValue>),
}

impl ParameterDef {
    pub fn int_range(name: impl Into<String>, min: i64, max: i64, step: i64) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Int,
            min: Some(min as f64),
            max: Some(max as f64),
            step: Some(step as f64),
            values: None,
        }
    }

    pub fn float_range(name: impl Into<String>, min: f64, max: f64, step: f64) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Float,
            min: Some(min),
            max: Some(max),
            step: Some(step),
            values: None,
        }
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Bool,
            min: None,
            max: None,
            step: None,
            values: None,
        }
    }

    pub fn choices(name: impl Into<String>, kind: ParamKind, values: Vec<ParamValue>) -> Self {
        Self {
            name: name.into(),
            kind,
            min: None,
            max: None,
            step: None,
            values: Some(values),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.domain().map(|_| ())
    }

    /// Every value of the domain in ascending order (range) or declaration order (list).
    pub fn values(&self) -> Result<Vec<ParamValue>, String> {
        Ok(match self.domain()? {
            Domain::IntRange { min, max, step } => (0..)
                .map(|i: i64| min + i * step)
                .take_while(|v| *v <= max)
                .map(ParamValue::Int)
                .collect(),
            Domain::FloatRange { min, max, step } => {
                let count = ((max - min) / step + 1e-9).floor() as usize + 1;
                // min + i * step rather than repeated addition.
                (0..count)
                    .map(|i| ParamValue::Float(min + i as f64 * step))
                    .collect()
            }
            Domain::Values(values) => values,
        })
    }

    pub fn cardinality(&self) -> Result<usize, String> {
        Ok(match self.domain()? {
            Domain::IntRange { min, max, step } => ((max - min) / step) as usize + 1,
            Domain::FloatRange { min, max, step } => {
                ((max - min) / step + 1e-9).floor() as usize + 1
            }
            Domain::Values(values) => values.len(),
        })
    }

    /// Uniform draw from the domain. Integer ranges respect the step; float ranges are
    /// continuous over `[min, max]`.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<ParamValue, String> {
        Ok(match self.domain()? {
            Domain::IntRange { min, max, step } => {
                let slots = (max - min) / step;
                ParamValue::Int(min + rng.gen_range(0..=slots) * step)
            }
            Domain::FloatRange { min, max, .. } => {
                if max > min {
                    ParamValue::Float(rng.gen_range(min..=max))
                } else {
                    ParamValue::Float(min)
                }
            }
            Domain::Values(values) => values[rng.gen_range(0..values.len())].clone(),
        })
    }

    fn domain(&self) -> Result<Domain, String> {
        if self.name.trim().is_empty() {
            return Err("parameter name cannot be empty".to_string());
        }
        if let Some(values) = &self.values {
            if self.min.is_some() || self.max.is_some() || self.step.is_some() {
                return Err(format!(
                    "parameter '{}' declares both values and a range",
                    self.name
                ));
            }
            if values.is_empty() {
                return Err(format!("parameter '{}' has an empty value list", self.name));
            }
            let coerced = values
                .iter()
                .map(|v| coerce(self.kind, v))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    format!(
                        "parameter '{}' has values that are not of type {:?}",
                        self.name, self.kind
                    )
                })?;
            return Ok(Domain::Values(coerced));
        }

        match self.kind {
            ParamKind::Bool => Ok(Domain::Values(vec![
                ParamValue::Bool(false),
                ParamValue::Bool(true),
            ])),
            ParamKind::String => Err(format!(
                "string parameter '{}' needs an explicit value list",
                self.name
            )),
            ParamKind::Int | ParamKind::Float => {
                let (Some(min), Some(max)) = (self.min, self.max) else {
                    return Err(format!(
                        "numeric parameter '{}' needs min and max (or values)",
                        self.name
                    ));
                };
                if !min.is_finite() || !max.is_finite() || min > max {
                    return Err(format!(
                        "parameter '{}' has an invalid range [{min}, {max}]",
                        self.name
                    ));
                }
                let step = match (self.kind, self.step) {
                    (_, Some(step)) => step,
                    (ParamKind::Int, None) => 1.0,
                    _ => {
                        return Err(format!("float parameter '{}' needs a step", self.name));
                    }
                };
                if !step.is_finite() || step <= 0.0 {
                    return Err(format!(
                        "parameter '{}' step must be positive, got {step}",
                        self.name
                    ));
                }
                if self.kind == ParamKind::Float {
                    return Ok(Domain::FloatRange { min, max, step });
                }
                if min.fract() != 0.0 || max.fract() != 0.0 || step.fract() != 0.0 {
                    return Err(format!(
                        "int parameter '{}' has a fractional bound or step",
                        self.name
                    ));
                }
                Ok(Domain::IntRange {
                    min: min as i64,
                    max: max as i64,
                    step: step as i64,
                })
            }
        }
    }
}

fn coerce(kind: ParamKind, value: &ParamValue) -> Option<ParamValue> {
    match (kind, value) {
        (ParamKind::Int, v) => v.as_int().map(ParamValue::Int),
        (ParamKind::Float, v) => v.as_float().map(ParamValue::Float),
        (ParamKind::Bool, ParamValue::Bool(v)) => Some(ParamValue::Bool(*v)),
        (ParamKind::String, ParamValue::Str(v)) => Some(ParamValue::Str(v.clone())),
        _ => None,
    }
}

/// Cartesian expansion in declaration order; the last parameter varies fastest.
pub fn expand_grid(params: &[ParameterDef]) -> Result<Vec<ParameterSet>, String> {
    let mut out: Vec<ParameterSet> = vec![ParameterSet::new()];
    for param in params {
        let values = param.values()?;
        let mut next: Vec<ParameterSet> = Vec::with_capacity(out.len() * values.len());
        for base in &out {
            for value in &values {
                let mut set = base.clone();
                set.insert(param.name.clone(), value.clone());
                next.push(set);
            }
        }
        out = next;
    }
    Ok(out)
}

/// Size of the full grid without materializing it.
pub fn grid_size(params: &[ParameterDef]) -> Result<usize, String> {
    params
        .iter()
        .try_fold(1usize, |acc, p| Ok(acc.saturating_mul(p.cardinality()?)))
}

pub fn validate_params(params: &[ParameterDef]) -> Result<(), String> {
    let mut seen = std::collections::BTreeSet::new();
    for param in params {
        param.validate()?;
        if !seen.insert(param.name.as_str()) {
            return Err(format!("duplicate parameter '{}'", param.name));
        }
    }
    Ok(())
}

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A value crossing the automation boundary. Mirrors the VARIANT shapes
/// the host actually hands back for the members we touch.
#[derive(Clone, Default)]
pub enum ComValue {
    #[default]
    Null,
    Bool(bool),
    I32(i32),
    F64(f64),
    Str(String),
    Obj(DispatchRef),
    Array(Vec<ComValue>),
}

pub type DispatchRef = Arc<dyn Dispatch>;

impl fmt::Debug for ComValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComValue::Null => write!(f, "Null"),
            ComValue::Bool(v) => write!(f, "Bool({v})"),
            ComValue::I32(v) => write!(f, "I32({v})"),
            ComValue::F64(v) => write!(f, "F64({v})"),
            ComValue::Str(v) => write!(f, "Str({v:?})"),
            ComValue::Obj(_) => write!(f, "Obj(..)"),
            ComValue::Array(v) => write!(f, "Array(len={})", v.len()),
        }
    }
}

impl ComValue {
    pub fn str(value: impl Into<String>) -> Self {
        ComValue::Str(value.into())
    }

    pub fn as_obj(&self) -> Option<DispatchRef> {
        match self {
            ComValue::Obj(obj) => Some(obj.clone()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ComValue::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ComValue::F64(v) => Some(*v),
            ComValue::I32(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            ComValue::I32(v) => Some(*v),
            ComValue::F64(v) => Some(*v as i32),
            _ => None,
        }
    }

    /// Host rendering of the value, as it would appear in a cell.
    pub fn display_text(&self) -> String {
        match self {
            ComValue::Null => String::new(),
            ComValue::Bool(v) => if *v { "TRUE" } else { "FALSE" }.to_string(),
            ComValue::I32(v) => v.to_string(),
            ComValue::F64(v) if v.fract() == 0.0 && v.abs() < 1e15 => {
                format!("{}", *v as i64)
            }
            ComValue::F64(v) => v.to_string(),
            ComValue::Str(v) => v.clone(),
            ComValue::Obj(_) => String::new(),
            ComValue::Array(_) => String::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ComValue::Null | ComValue::Obj(_) => serde_json::Value::Null,
            ComValue::Bool(v) => serde_json::Value::Bool(*v),
            ComValue::I32(v) => serde_json::json!(v),
            ComValue::F64(v) => serde_json::json!(v),
            ComValue::Str(v) => serde_json::Value::String(v.clone()),
            ComValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(ComValue::to_json).collect())
            }
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ComValue::Null,
            serde_json::Value::Bool(v) => ComValue::Bool(*v),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => ComValue::F64(f),
                None => ComValue::Str(n.to_string()),
            },
            serde_json::Value::String(s) => ComValue::Str(s.clone()),
            serde_json::Value::Array(items) => {
                ComValue::Array(items.iter().map(ComValue::from_json).collect())
            }
            other => ComValue::Str(other.to_string()),
        }
    }
}

/// Failure from the automation host. The message carries whatever the
/// host reported, hresult markers included.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DispatchError {
    pub message: String,
}

impl DispatchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn no_member(name: &str) -> Self {
        Self::new(format!("no member '{name}'"))
    }
}

/// Late-bound member access on one automation object. The production
/// implementation wraps an IDispatch pointer; tests script the calls.
pub trait Dispatch: Send + Sync {
    /// Property get, with optional index arguments.
    fn get(&self, name: &str, args: &[ComValue]) -> Result<ComValue, DispatchError>;

    /// Property put.
    fn put(&self, name: &str, value: ComValue) -> Result<(), DispatchError>;

    /// Method invocation.
    fn call(&self, name: &str, args: &[ComValue]) -> Result<ComValue, DispatchError>;
}

/// Fetch a member that different host versions expose either as a
/// property or as a callable.
pub fn resolve_collection(obj: &dyn Dispatch, name: &str) -> Result<DispatchRef, DispatchError> {
    if let Ok(value) = obj.get(name, &[]) {
        if let Some(obj) = value.as_obj() {
            return Ok(obj);
        }
    }
    let value = obj.call(name, &[])?;
    value
        .as_obj()
        .ok_or_else(|| DispatchError::new(format!("member '{name}' is not an object")))
}

/// Index into a collection. Hosts accept either `coll(key)` or
/// `coll.Item(key)`; try both before giving up.
pub fn collection_item(
    collection: &dyn Dispatch,
    key: ComValue,
) -> Result<DispatchRef, DispatchError> {
    if let Ok(value) = collection.call("Item", std::slice::from_ref(&key)) {
        if let Some(obj) = value.as_obj() {
            return Ok(obj);
        }
    }
    let value = collection.get("Item", &[key])?;
    value
        .as_obj()
        .ok_or_else(|| DispatchError::new("collection item is not an object"))
}

/// Object-valued member reached via get or call, with index arguments.
pub fn member_object(
    obj: &dyn Dispatch,
    name: &str,
    args: &[ComValue],
) -> Result<DispatchRef, DispatchError> {
    if let Ok(value) = obj.get(name, args) {
        if let Some(obj) = value.as_obj() {
            return Ok(obj);
        }
    }
    let value = obj.call(name, args)?;
    value
        .as_obj()
        .ok_or_else(|| DispatchError::new(format!("member '{name}' is not an object")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_text_matches_cell_rendering() {
        assert_eq!(ComValue::F64(42.0).display_text(), "42");
        assert_eq!(ComValue::F64(1.5).display_text(), "1.5");
        assert_eq!(ComValue::Bool(true).display_text(), "TRUE");
        assert_eq!(ComValue::Null.display_text(), "");
    }

    #[test]
    fn json_round_trip_for_scalars() {
        let value = ComValue::from_json(&serde_json::json!("text"));
        assert_eq!(value.as_str(), Some("text"));
        assert_eq!(value.to_json(), serde_json::json!("text"));

        let value = ComValue::from_json(&serde_json::json!(2.5));
        assert_eq!(value.as_f64(), Some(2.5));
    }
}

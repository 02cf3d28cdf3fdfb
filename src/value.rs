//! Engine-internal JavaScript value representation.
//!
//! Values are `Rc`-based and single-threaded; an [`Engine`](crate::Engine)
//! and everything it owns are affine to one thread. Host code never holds
//! these types directly, only [`HostValue`](crate::bridge::HostValue)
//! copies or opaque handles minted by the bridge.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::compiler::Chunk;

/// Trait for types with cheap (O(1), reference-counted) clones.
///
/// Makes it explicit at call sites that a clone only bumps a reference
/// count rather than copying data.
pub trait CheapClone: Clone {
    fn cheap_clone(&self) -> Self {
        self.clone()
    }
}

impl<T: ?Sized> CheapClone for Rc<T> {}

/// An immutable, reference-counted engine string.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct JsString(Rc<str>);

impl CheapClone for JsString {}

impl JsString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        JsString(Rc::from(s))
    }
}

impl From<String> for JsString {
    fn from(s: String) -> Self {
        JsString(Rc::from(s.as_str()))
    }
}

impl AsRef<str> for JsString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// A reference to a heap object.
pub type JsObjectRef = Rc<RefCell<JsObject>>;

/// A JavaScript value.
#[derive(Clone, Default)]
pub enum JsValue {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(JsString),
    Object(JsObjectRef),
}

impl JsValue {
    pub fn object(obj: JsObject) -> Self {
        JsValue::Object(Rc::new(RefCell::new(obj)))
    }

    pub fn as_object(&self) -> Option<&JsObjectRef> {
        match self {
            JsValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        match self {
            JsValue::Object(obj) => {
                matches!(obj.borrow().exotic, ExoticObject::Function(_))
            }
            _ => false,
        }
    }

    /// The `typeof` result for this value.
    pub fn type_of(&self) -> &'static str {
        match self {
            JsValue::Undefined => "undefined",
            JsValue::Null => "object", // historical quirk
            JsValue::Boolean(_) => "boolean",
            JsValue::Number(_) => "number",
            JsValue::String(_) => "string",
            JsValue::Object(obj) => {
                if obj.borrow().is_callable() {
                    "function"
                } else {
                    "object"
                }
            }
        }
    }

    /// ToBoolean.
    pub fn to_boolean(&self) -> bool {
        match self {
            JsValue::Undefined | JsValue::Null => false,
            JsValue::Boolean(b) => *b,
            JsValue::Number(n) => *n != 0.0 && !n.is_nan(),
            JsValue::String(s) => !s.is_empty(),
            JsValue::Object(_) => true,
        }
    }

    /// ToNumber.
    pub fn to_number(&self) -> f64 {
        match self {
            JsValue::Undefined => f64::NAN,
            JsValue::Null => 0.0,
            JsValue::Boolean(true) => 1.0,
            JsValue::Boolean(false) => 0.0,
            JsValue::Number(n) => *n,
            JsValue::String(s) => {
                let trimmed = s.as_str().trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            JsValue::Object(_) => f64::NAN,
        }
    }

    /// ToString.
    pub fn to_js_string(&self) -> JsString {
        match self {
            JsValue::Undefined => JsString::from("undefined"),
            JsValue::Null => JsString::from("null"),
            JsValue::Boolean(true) => JsString::from("true"),
            JsValue::Boolean(false) => JsString::from("false"),
            JsValue::Number(n) => JsString::from(number_to_string(*n)),
            JsValue::String(s) => s.cheap_clone(),
            JsValue::Object(obj) => {
                let obj = obj.borrow();
                match &obj.exotic {
                    ExoticObject::Array { .. } => JsString::from("[object Array]"),
                    ExoticObject::Function(func) => JsString::from(format!(
                        "function {}() {{ [code] }}",
                        func.name().unwrap_or("")
                    )),
                    ExoticObject::Error { .. } => {
                        let name = obj
                            .get_property("name")
                            .map(|v| v.to_js_string().to_string())
                            .unwrap_or_else(|| "Error".to_string());
                        let message = obj
                            .get_property("message")
                            .map(|v| v.to_js_string().to_string())
                            .unwrap_or_default();
                        if message.is_empty() {
                            JsString::from(name)
                        } else {
                            JsString::from(format!("{}: {}", name, message))
                        }
                    }
                    ExoticObject::Ordinary => JsString::from("[object Object]"),
                }
            }
        }
    }

    /// Strict equality (`===`).
    pub fn strict_equals(&self, other: &JsValue) -> bool {
        match (self, other) {
            (JsValue::Undefined, JsValue::Undefined) => true,
            (JsValue::Null, JsValue::Null) => true,
            (JsValue::Boolean(a), JsValue::Boolean(b)) => a == b,
            (JsValue::Number(a), JsValue::Number(b)) => {
                // NaN !== NaN
                !(a.is_nan() || b.is_nan()) && a == b
            }
            (JsValue::String(a), JsValue::String(b)) => a == b,
            (JsValue::Object(a), JsValue::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Loose equality (`==`), restricted to the coercions the subset needs.
    pub fn loose_equals(&self, other: &JsValue) -> bool {
        match (self, other) {
            (JsValue::Undefined | JsValue::Null, JsValue::Undefined | JsValue::Null) => true,
            (JsValue::Number(_), JsValue::String(_))
            | (JsValue::String(_), JsValue::Number(_))
            | (JsValue::Boolean(_), _)
            | (_, JsValue::Boolean(_)) => {
                let (a, b) = (self.to_number(), other.to_number());
                !(a.is_nan() || b.is_nan()) && a == b
            }
            _ => self.strict_equals(other),
        }
    }
}

/// JS number-to-string, covering the cases the subset produces.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Debug for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsValue::Undefined => write!(f, "undefined"),
            JsValue::Null => write!(f, "null"),
            JsValue::Boolean(b) => write!(f, "{}", b),
            JsValue::Number(n) => write!(f, "{}", n),
            JsValue::String(s) => write!(f, "{:?}", s),
            JsValue::Object(obj) => {
                let obj = obj.borrow();
                match &obj.exotic {
                    ExoticObject::Ordinary => write!(f, "{{...}}"),
                    ExoticObject::Array { elements } => write!(f, "[...{}]", elements.len()),
                    ExoticObject::Function(func) => {
                        write!(f, "[Function: {}]", func.name().unwrap_or("anonymous"))
                    }
                    ExoticObject::Error { .. } => write!(f, "[Error]"),
                }
            }
        }
    }
}

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        JsValue::Boolean(b)
    }
}

impl From<f64> for JsValue {
    fn from(n: f64) -> Self {
        JsValue::Number(n)
    }
}

impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        JsValue::String(JsString::from(s))
    }
}

/// A heap object: ordered named properties plus an exotic payload.
pub struct JsObject {
    pub properties: IndexMap<JsString, JsValue>,
    pub exotic: ExoticObject,
}

impl JsObject {
    pub fn ordinary() -> Self {
        JsObject {
            properties: IndexMap::new(),
            exotic: ExoticObject::Ordinary,
        }
    }

    pub fn array(elements: Vec<JsValue>) -> Self {
        JsObject {
            properties: IndexMap::new(),
            exotic: ExoticObject::Array { elements },
        }
    }

    pub fn function(func: JsFunction) -> Self {
        JsObject {
            properties: IndexMap::new(),
            exotic: ExoticObject::Function(func),
        }
    }

    /// Build an error object: `name`/`message` properties plus the exotic
    /// marker the VM and bridge use to recognize exceptions.
    pub fn error(name: &str, message: &str, native_origin: bool) -> Self {
        let mut properties = IndexMap::new();
        properties.insert(JsString::from("name"), JsValue::from(name));
        properties.insert(JsString::from("message"), JsValue::from(message));
        JsObject {
            properties,
            exotic: ExoticObject::Error { native_origin },
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.exotic, ExoticObject::Function(_))
    }

    pub fn get_property(&self, key: &str) -> Option<JsValue> {
        if let ExoticObject::Array { elements } = &self.exotic {
            if key == "length" {
                return Some(JsValue::Number(elements.len() as f64));
            }
            if let Ok(index) = key.parse::<usize>() {
                return elements.get(index).cloned();
            }
        }
        self.properties.get(&JsString::from(key)).cloned()
    }

    pub fn set_property(&mut self, key: JsString, value: JsValue) {
        if let ExoticObject::Array { elements } = &mut self.exotic {
            if let Ok(index) = key.as_str().parse::<usize>() {
                while elements.len() <= index {
                    elements.push(JsValue::Undefined);
                }
                if let Some(slot) = elements.get_mut(index) {
                    *slot = value;
                }
                return;
            }
        }
        self.properties.insert(key, value);
    }
}

/// Exotic object payloads.
pub enum ExoticObject {
    Ordinary,
    Array { elements: Vec<JsValue> },
    Function(JsFunction),
    Error { native_origin: bool },
}

/// A callable.
pub enum JsFunction {
    /// Script function compiled to its own chunk.
    Script { chunk: Rc<Chunk> },
    /// Host-installed native binding, dispatched by id through the
    /// context's binding table.
    Native {
        name: JsString,
        arity: u8,
        binding_id: u32,
    },
    /// Built-in error constructor (`Error`, `TypeError`, `RangeError`).
    ErrorCtor { name: JsString },
}

impl JsFunction {
    pub fn name(&self) -> Option<&str> {
        match self {
            JsFunction::Script { chunk } => {
                if chunk.name.is_empty() {
                    None
                } else {
                    Some(&chunk.name)
                }
            }
            JsFunction::Native { name, .. } => Some(name.as_str()),
            JsFunction::ErrorCtor { name } => Some(name.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_equals_nan() {
        let nan = JsValue::Number(f64::NAN);
        assert!(!nan.strict_equals(&nan));
    }

    #[test]
    fn to_boolean_follows_js_truthiness() {
        assert!(!JsValue::Undefined.to_boolean());
        assert!(!JsValue::Number(0.0).to_boolean());
        assert!(!JsValue::from("").to_boolean());
        assert!(JsValue::from("x").to_boolean());
        assert!(JsValue::object(JsObject::ordinary()).to_boolean());
    }

    #[test]
    fn number_formatting() {
        assert_eq!(number_to_string(2.0), "2");
        assert_eq!(number_to_string(2.5), "2.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(-0.0), "0");
    }

    #[test]
    fn array_length_and_index_properties() {
        let arr = JsObject::array(vec![JsValue::Number(1.0), JsValue::Number(2.0)]);
        assert!(matches!(
            arr.get_property("length"),
            Some(JsValue::Number(n)) if n == 2.0
        ));
        assert!(matches!(
            arr.get_property("1"),
            Some(JsValue::Number(n)) if n == 2.0
        ));
    }

    #[test]
    fn error_object_renders_name_and_message() {
        let e = JsValue::object(JsObject::error("TypeError", "bad", false));
        assert_eq!(e.to_js_string().as_str(), "TypeError: bad");
    }
}

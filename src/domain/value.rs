// Runtime values for recurviz.
// Lists are shared and mutable so a callee can change its caller's data in place.

use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

type ListPtr = *const RefCell<Vec<Value>>;

/// A value flowing through a traced call: argument, local or return value.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Rc<RefCell<Vec<Value>>>),
}

impl Value {
    /// Build a fresh list value that nothing else aliases.
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    /// Recursively copy the value so that later mutation of the original
    /// (through any alias) can never be observed in the copy.
    ///
    /// Lists reached twice are copied once, so sharing and cycles inside
    /// the value are reproduced in the copy rather than unrolled.
    pub fn deep_copy(&self) -> Value {
        self.copy_with(&mut HashMap::new())
    }

    fn copy_with(&self, memo: &mut HashMap<ListPtr, Value>) -> Value {
        let Value::List(items) = self else {
            return self.clone();
        };
        if let Some(copy) = memo.get(&Rc::as_ptr(items)) {
            return copy.clone();
        }
        let copy = Rc::new(RefCell::new(Vec::new()));
        memo.insert(Rc::as_ptr(items), Value::List(Rc::clone(&copy)));
        let copied: Vec<Value> = items.borrow().iter().map(|v| v.copy_with(memo)).collect();
        *copy.borrow_mut() = copied;
        Value::List(copy)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Truthiness used by `if`, `while`, `and`, `or`, `not`.
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
        }
    }

    /// Representation used for values nested inside a list: strings are quoted.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, &mut Vec::new());
        out
    }

    /// `path` holds the lists currently being written; meeting one of them
    /// again prints `[...]`.
    fn write_repr(&self, out: &mut String, path: &mut Vec<ListPtr>) {
        match self {
            Value::Str(s) => {
                out.push('\'');
                out.push_str(&s.replace('\\', "\\\\").replace('\'', "\\'"));
                out.push('\'');
            }
            Value::List(items) => {
                let ptr = Rc::as_ptr(items);
                if path.contains(&ptr) {
                    out.push_str("[...]");
                    return;
                }
                path.push(ptr);
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, path);
                }
                out.push(']');
                path.pop();
            }
            scalar => out.push_str(&scalar.to_string()),
        }
    }

    /// Structural equality. A pair of lists already being compared further
    /// up counts as equal, which keeps cyclic lists from looping.
    fn eq_with(&self, other: &Value, path: &mut Vec<(ListPtr, ListPtr)>) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Rc::as_ptr(a), Rc::as_ptr(b));
                if path.contains(&pair) {
                    return true;
                }
                let (xs, ys) = (a.borrow(), b.borrow());
                if xs.len() != ys.len() {
                    return false;
                }
                path.push(pair);
                let equal = xs.iter().zip(ys.iter()).all(|(x, y)| x.eq_with(y, path));
                path.pop();
                equal
            }
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Bool(a), Value::Int(b)) | (Value::Int(b), Value::Bool(a)) => {
                i64::from(*a) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_with(other, &mut Vec::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => {
                if x.is_nan() {
                    f.write_str("nan")
                } else if x.is_infinite() {
                    f.write_str(if *x > 0.0 { "inf" } else { "-inf" })
                } else if x.fract() == 0.0 {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::List(_) => f.write_str(&self.repr()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Value::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::List(_) => write!(f, "List({})", self.repr()),
        }
    }
}

/// Serializes a value while remembering the lists above it; a list that
/// contains itself is written as the string `"[...]"`.
struct Tracked<'a> {
    value: &'a Value,
    path: &'a RefCell<Vec<ListPtr>>,
}

impl Serialize for Tracked<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.value {
            Value::None => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let ptr = Rc::as_ptr(items);
                if self.path.borrow().contains(&ptr) {
                    return serializer.serialize_str("[...]");
                }
                self.path.borrow_mut().push(ptr);
                let items = items.borrow();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(&Tracked { value: item, path: self.path })?;
                }
                self.path.borrow_mut().pop();
                seq.end()
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let path = RefCell::new(Vec::new());
        Tracked { value: self, path: &path }.serialize(serializer)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::None
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::list(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::None, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_familiar_notation() {
        assert_eq!(Value::None.to_string(), "None");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(0.5).to_string(), "0.5");
        assert_eq!(Value::Float(f64::NEG_INFINITY).to_string(), "-inf");
        assert_eq!(Value::from(vec![1, 2, 3]).to_string(), "[1, 2, 3]");
        assert_eq!(Value::from("ab").to_string(), "ab");
        assert_eq!(Value::from(vec!["a", "b"]).to_string(), "['a', 'b']");
    }

    #[test]
    fn test_deep_copy_is_detached() {
        let inner = Value::from(vec![1, 2]);
        let outer = Value::list(vec![inner.clone(), Value::Int(3)]);
        let snapshot = outer.deep_copy();

        if let Value::List(items) = &inner {
            items.borrow_mut()[0] = Value::Int(99);
        }
        assert_eq!(outer.to_string(), "[[99, 2], 3]");
        assert_eq!(snapshot.to_string(), "[[1, 2], 3]");
    }

    #[test]
    fn test_clone_aliases_list() {
        let a = Value::from(vec![1]);
        let b = a.clone();
        if let Value::List(items) = &b {
            items.borrow_mut().push(Value::Int(2));
        }
        assert_eq!(a.to_string(), "[1, 2]");
    }

    fn self_containing() -> Value {
        let xs = Value::from(vec![1]);
        if let Value::List(items) = &xs {
            items.borrow_mut().push(xs.clone());
        }
        xs
    }

    #[test]
    fn test_cyclic_list_display() {
        let xs = self_containing();
        assert_eq!(xs.to_string(), "[1, [...]]");

        // Shared but acyclic sublists print in full.
        let inner = Value::from(vec![2]);
        let twice = Value::list(vec![inner.clone(), inner]);
        assert_eq!(twice.to_string(), "[[2], [2]]");
    }

    #[test]
    fn test_cyclic_list_deep_copy() {
        let xs = self_containing();
        let copy = xs.deep_copy();
        assert_eq!(copy.to_string(), "[1, [...]]");

        // The copy points at itself, not at the original.
        let (Value::List(orig), Value::List(cells)) = (&xs, &copy) else { unreachable!() };
        match &cells.borrow()[1] {
            Value::List(back) => assert!(Rc::ptr_eq(back, cells) && !Rc::ptr_eq(back, orig)),
            other => panic!("expected list, got {:?}", other),
        }
        orig.borrow_mut()[0] = Value::Int(7);
        assert_eq!(copy.to_string(), "[1, [...]]");

        // Break the cycles so the test does not leak.
        orig.borrow_mut().clear();
        cells.borrow_mut().clear();
    }

    #[test]
    fn test_cyclic_list_equality_and_json() {
        let a = self_containing();
        let b = self_containing();
        assert!(a == a.clone());
        assert!(a == b);
        assert!(a != Value::from(vec![1, 2]));
        assert_eq!(format!("{:?}", a), "List([1, [...]])");
        assert_eq!(serde_json::to_string(&a).unwrap(), r#"[1,"[...]"]"#);
    }

    #[test]
    fn test_serialize_to_json() {
        let v = Value::list(vec![Value::Int(1), Value::None, Value::from("x")]);
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"[1,null,"x"]"#);
    }
}

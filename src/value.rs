use std::any::Any;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An argument passed to a cached computation.
///
/// Primitive values are hashable as they are. Arbitrary types enter through
/// [`Value::Object`] and decide through the [`Object`] trait how (and whether)
/// they take part in a cache key.
#[derive(Clone, Debug)]
pub enum Value {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
    Object(Arc<dyn Object>),
}

/// A type that can be passed to cached computations inside a [`Value`].
///
/// Types whose equality is a reliable cache discriminator return their
/// identity from [`hash_key`](Self::hash_key). Types whose equality is
/// unusable for caching (think of approximate or interval-like equality) may
/// instead provide a deterministic surrogate through
/// [`cache_key`](Self::cache_key). A type implementing neither cannot be part
/// of a key.
pub trait Object: Any + Debug + Send + Sync {
    /// The hashable identity of the object.
    ///
    /// Two objects returning the same atom are interchangeable as far as
    /// caching is concerned, regardless of their concrete type. The atom must
    /// not contain [`Atom::Extracted`], which is reserved for surrogates.
    /// Such keys are rejected as unhashable.
    fn hash_key(&self) -> Option<Atom> {
        None
    }

    /// A surrogate identity for objects without a hash key.
    ///
    /// The surrogate is normalized recursively and wrapped in
    /// [`Atom::Extracted`] so it can never collide with a native key.
    fn cache_key(&self) -> Option<Value> {
        None
    }

    /// The name reported in errors.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The hashable form of a [`Value`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Atom {
    None,
    Bool(bool),
    Int(i128),
    /// A float, compared and hashed by bit pattern.
    Float(u64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Atom>),
    /// A surrogate obtained through [`Object::cache_key`].
    Extracted(Box<Atom>),
}

impl Value {
    /// Wrap an object.
    pub fn object<T: Object>(object: T) -> Self {
        Self::Object(Arc::new(object))
    }

    /// A short description of the value's kind, used in errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Tuple(_) => "tuple",
            Self::Object(object) => object.type_name(),
        }
    }

    /// Borrow the wrapped object as a concrete type.
    pub fn downcast_ref<T: Object>(&self) -> Option<&T> {
        match self {
            Self::Object(object) => (&**object as &dyn Any).downcast_ref(),
            _ => None,
        }
    }

    /// Normalize the value into its hashable form.
    ///
    /// Objects with a hash key use it directly. Otherwise their cache key is
    /// normalized recursively and marked as extracted. Tuples are normalized
    /// element-wise, so a single unhashable element does not affect its
    /// siblings.
    pub fn to_atom(&self) -> Result<Atom> {
        Ok(match self {
            Self::None => Atom::None,
            Self::Bool(v) => Atom::Bool(*v),
            Self::Int(v) => Atom::Int(*v),
            Self::Float(v) => Atom::Float(v.to_bits()),
            Self::Str(v) => Atom::Str(v.clone()),
            Self::Bytes(v) => Atom::Bytes(v.clone()),
            Self::Tuple(items) => {
                Atom::Tuple(items.iter().map(Value::to_atom).collect::<Result<_>>()?)
            }
            Self::Object(object) => {
                if let Some(atom) = object.hash_key() {
                    if atom.is_extracted() {
                        return Err(Error::Unhashable {
                            type_name: object.type_name().into(),
                        });
                    }
                    atom
                } else if let Some(surrogate) = object.cache_key() {
                    Atom::Extracted(Box::new(surrogate.to_atom()?))
                } else {
                    return Err(Error::Unhashable {
                        type_name: object.type_name().into(),
                    });
                }
            }
        })
    }
}

impl Atom {
    /// Whether the atom is or contains a surrogate.
    fn is_extracted(&self) -> bool {
        match self {
            Self::Extracted(_) => true,
            Self::Tuple(items) => items.iter().any(Atom::is_extracted),
            _ => false,
        }
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(bits) => write!(f, "{:?}", f64::from_bits(*bits)),
            Self::Str(v) => f.write_str(v),
            Self::Bytes(bytes) => bytes.iter().try_for_each(|b| write!(f, "{b:02x}")),
            Self::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::Extracted(inner) => write!(f, "{inner}"),
        }
    }
}

impl From<i64> for Atom {
    fn from(v: i64) -> Self {
        Self::Int(v.into())
    }
}

impl From<&str> for Atom {
    fn from(v: &str) -> Self {
        Self::Str(v.into())
    }
}

impl From<String> for Atom {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

macro_rules! int_value {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Self::Int(v.into())
            }
        })*

        $(impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self> {
                match value {
                    Value::Int(v) => <$ty>::try_from(*v).map_err(|_| Error::Type {
                        expected: stringify!($ty),
                        found: v.to_string(),
                    }),
                    other => Err(mismatch(stringify!($ty), other)),
                }
            }
        })*
    };
}

int_value!(i8, i16, i32, i64, i128, u8, u16, u32, u64);

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Self::Int(v as i128)
    }
}

impl FromValue for usize {
    fn from_value(value: &Value) -> Result<Self> {
        u64::from_value(value)?.try_into().map_err(|_| Error::Type {
            expected: "usize",
            found: format!("{value:?}"),
        })
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Self::None
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::None, Into::into)
    }
}

impl<T: Object> From<Arc<T>> for Value {
    fn from(v: Arc<T>) -> Self {
        Self::Object(v)
    }
}

/// Extraction of typed arguments from a [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, found: &Value) -> Error {
    Error::Type { expected, found: found.type_name().into() }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(*v),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(mismatch("float", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Str(v) => Ok(v.clone()),
            other => Err(mismatch("str", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::None => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

macro_rules! tuple_value {
    ($($param:ident $idx:tt),*) => {
        impl<$($param: Into<Value>),*> From<($($param,)*)> for Value {
            fn from(v: ($($param,)*)) -> Self {
                Self::Tuple(vec![$(v.$idx.into()),*])
            }
        }

        impl<$($param: FromValue),*> FromValue for ($($param,)*) {
            fn from_value(value: &Value) -> Result<Self> {
                match value {
                    Value::Tuple(items) if items.len() == [$($idx),*].len() => {
                        Ok(($($param::from_value(&items[$idx])?,)*))
                    }
                    other => Err(mismatch("tuple", other)),
                }
            }
        }
    };
}

tuple_value! { A 0 }
tuple_value! { A 0, B 1 }
tuple_value! { A 0, B 1, C 2 }
tuple_value! { A 0, B 1, C 2, D 3 }

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Interval(f64, f64);

    impl Object for Interval {
        fn cache_key(&self) -> Option<Value> {
            Some((self.0, self.1).into())
        }
    }

    #[derive(Debug)]
    struct Opaque;

    impl Object for Opaque {}

    #[test]
    fn test_tuple_extraction_is_element_wise() {
        let value = Value::Tuple(vec![1.into(), Value::object(Interval(0.5, 1.5))]);
        let atom = value.to_atom().unwrap();
        let expected = Atom::Tuple(vec![
            Atom::Int(1),
            Atom::Extracted(Box::new(Atom::Tuple(vec![
                Atom::Float(0.5f64.to_bits()),
                Atom::Float(1.5f64.to_bits()),
            ]))),
        ]);
        assert_eq!(atom, expected);
    }

    #[test]
    fn test_unhashable_object() {
        let err = Value::Tuple(vec![Value::object(Opaque)]).to_atom().unwrap_err();
        assert!(matches!(err, Error::Unhashable { type_name } if type_name.ends_with("Opaque")));
    }

    #[derive(Debug)]
    struct Forged;

    impl Object for Forged {
        fn hash_key(&self) -> Option<Atom> {
            Some(Atom::Tuple(vec![Atom::Extracted(Box::new(Atom::Int(1)))]))
        }
    }

    #[derive(Debug)]
    struct One;

    impl Object for One {
        fn cache_key(&self) -> Option<Value> {
            Some(1.into())
        }
    }

    #[test]
    fn test_native_key_cannot_pose_as_surrogate() {
        let real = Value::Tuple(vec![Value::object(One)]).to_atom().unwrap();
        assert_eq!(real, Atom::Tuple(vec![Atom::Extracted(Box::new(Atom::Int(1)))]));
        let err = Value::object(Forged).to_atom().unwrap_err();
        assert!(matches!(err, Error::Unhashable { type_name } if type_name.ends_with("Forged")));
    }

    #[test]
    fn test_extraction() {
        assert_eq!(u32::from_value(&Value::from(7u32)).unwrap(), 7);
        assert!(u8::from_value(&Value::from(300)).is_err());
        assert_eq!(<(i64, String)>::from_value(&(1, "a").into()).unwrap(), (1, "a".into()));
        assert_eq!(Option::<bool>::from_value(&Value::None).unwrap(), None);
    }

    #[test]
    fn test_display() {
        let atom = Atom::Tuple(vec![Atom::Int(1), Atom::Str("x".into())]);
        assert_eq!(atom.to_string(), "(1, x)");
        assert_eq!(Atom::Tuple(vec![Atom::None]).to_string(), "(None,)");
        assert_eq!(Atom::Float(2.0f64.to_bits()).to_string(), "2.0");
    }
}

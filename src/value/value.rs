use std::collections::HashMap;

use crate::{ObjectPath, Signature, ValueType, Variant};

/// A dynamically typed D-Bus value.
///
/// This is the "any" representation used by the codec: every value carries
/// exactly the information needed to derive its [`Signature`] and marshal it
/// to the wire.
///
/// # Examples
///
/// ```
/// use wirebus::Value;
///
/// let value = Value::from(vec![42i32, 420]);
/// assert_eq!(value.signature(), "ai");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// An unsigned 8-bit integer, type code `y`.
    Byte(u8),
    /// A boolean, type code `b`.
    Bool(bool),
    /// A signed 16-bit integer, type code `n`.
    Int16(i16),
    /// An unsigned 16-bit integer, type code `q`.
    Uint16(u16),
    /// A signed 32-bit integer, type code `i`.
    Int32(i32),
    /// An unsigned 32-bit integer, type code `u`.
    Uint32(u32),
    /// A signed 64-bit integer, type code `x`.
    Int64(i64),
    /// An unsigned 64-bit integer, type code `t`.
    Uint64(u64),
    /// An IEEE-754 double, type code `d`.
    Double(f64),
    /// A string, type code `s`.
    Str(String),
    /// An object path, type code `o`.
    Path(ObjectPath),
    /// A signature, type code `g`.
    Sig(Signature),
    /// An array of uniformly typed elements, type code `a`.
    ///
    /// The element signature is carried explicitly so that empty arrays
    /// still marshal with a complete type.
    Array {
        /// The signature of a single element.
        element: Signature,
        /// The elements of the array.
        values: Vec<Value>,
    },
    /// A dictionary, type code `a{…}`.
    Dict {
        /// The signature of a key.
        key: Signature,
        /// The signature of a value.
        value: Signature,
        /// The entries of the dictionary.
        entries: Vec<(Value, Value)>,
    },
    /// A struct with positional fields, type code `(…)`.
    Struct(Vec<Value>),
    /// A variant: a value which carries its own signature on the wire.
    Variant(Box<Variant>),
}

impl Value {
    /// The signature describing this value.
    pub fn signature(&self) -> Signature {
        let mut out = String::new();
        self.write_signature(&mut out);
        Signature::from_string_unchecked(out)
    }

    pub(crate) fn write_signature(&self, out: &mut String) {
        match self {
            Value::Byte(..) => out.push('y'),
            Value::Bool(..) => out.push('b'),
            Value::Int16(..) => out.push('n'),
            Value::Uint16(..) => out.push('q'),
            Value::Int32(..) => out.push('i'),
            Value::Uint32(..) => out.push('u'),
            Value::Int64(..) => out.push('x'),
            Value::Uint64(..) => out.push('t'),
            Value::Double(..) => out.push('d'),
            Value::Str(..) => out.push('s'),
            Value::Path(..) => out.push('o'),
            Value::Sig(..) => out.push('g'),
            Value::Array { element, .. } => {
                out.push('a');
                out.push_str(element.as_str());
            }
            Value::Dict { key, value, .. } => {
                out.push_str("a{");
                out.push_str(key.as_str());
                out.push_str(value.as_str());
                out.push('}');
            }
            Value::Struct(fields) => {
                out.push('(');

                for field in fields {
                    field.write_signature(out);
                }

                out.push(')');
            }
            Value::Variant(..) => out.push('v'),
        }
    }

    /// A short name for the contained type, used in error reporting.
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Byte(..) => "byte",
            Value::Bool(..) => "bool",
            Value::Int16(..) => "int16",
            Value::Uint16(..) => "uint16",
            Value::Int32(..) => "int32",
            Value::Uint32(..) => "uint32",
            Value::Int64(..) => "int64",
            Value::Uint64(..) => "uint64",
            Value::Double(..) => "double",
            Value::Str(..) => "string",
            Value::Path(..) => "object path",
            Value::Sig(..) => "signature",
            Value::Array { .. } => "array",
            Value::Dict { .. } => "dict",
            Value::Struct(..) => "struct",
            Value::Variant(..) => "variant",
        }
    }
}

macro_rules! from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                #[inline]
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

from_scalar! {
    u8 => Byte,
    bool => Bool,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    i64 => Int64,
    u64 => Uint64,
    f64 => Double,
    String => Str,
    ObjectPath => Path,
    Signature => Sig,
}

impl From<&str> for Value {
    #[inline]
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<&ObjectPath> for Value {
    #[inline]
    fn from(value: &ObjectPath) -> Self {
        Value::Path(value.clone())
    }
}

impl From<Variant> for Value {
    #[inline]
    fn from(value: Variant) -> Self {
        Value::Variant(Box::new(value))
    }
}

impl<T> From<Vec<T>> for Value
where
    T: ValueType,
{
    fn from(values: Vec<T>) -> Self {
        Value::Array {
            element: T::signature(),
            values: values.into_iter().map(T::into_value).collect(),
        }
    }
}

impl<K, V> From<HashMap<K, V>> for Value
where
    K: ValueType,
    V: ValueType,
{
    fn from(map: HashMap<K, V>) -> Self {
        Value::Dict {
            key: K::signature(),
            value: V::signature(),
            entries: map
                .into_iter()
                .map(|(k, v)| (k.into_value(), v.into_value()))
                .collect(),
        }
    }
}

macro_rules! from_tuple {
    ($($ty:ident),*) => {
        impl<$($ty,)*> From<($($ty,)*)> for Value
        where
            $($ty: ValueType,)*
        {
            fn from(value: ($($ty,)*)) -> Self {
                #[allow(non_snake_case)]
                let ($($ty,)*) = value;
                Value::Struct(vec![$($ty.into_value(),)*])
            }
        }
    };
}

from_tuple!(A, B);
from_tuple!(A, B, C);
from_tuple!(A, B, C, D);
from_tuple!(A, B, C, D, E);
from_tuple!(A, B, C, D, E, F);

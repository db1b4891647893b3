use std::collections::HashMap;
use std::hash::Hash;

use crate::codec::Decoder;
use crate::error::{Error, ErrorKind, Result};
use crate::{ObjectPath, Signature, Value, Variant};

/// A native type with a fixed D-Bus signature.
///
/// This is the typed seam of the codec: implementing types know their own
/// element signature, how to become a [`Value`], and how to be recovered
/// from one. Tuples map onto D-Bus structs with positional fields.
///
/// # Examples
///
/// ```
/// use wirebus::ValueType;
///
/// assert_eq!(<Vec<i32>>::signature(), "ai");
/// assert_eq!(<(u32, String)>::signature(), "(us)");
/// ```
pub trait ValueType: Sized {
    /// The element signature of this type.
    fn signature() -> Signature;

    /// Convert into a dynamically typed value.
    fn into_value(self) -> Value;

    /// Recover from a dynamically typed value.
    ///
    /// # Errors
    ///
    /// Errors with a type mismatch if the value does not match exactly.
    fn from_value(value: Value) -> Result<Self>;
}

macro_rules! leaf_value_type {
    ($($ty:ty, $variant:ident, $sig:literal, $expected:literal),* $(,)?) => {
        $(
            impl ValueType for $ty {
                #[inline]
                fn signature() -> Signature {
                    Signature::from_string_unchecked($sig.into())
                }

                #[inline]
                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Result<Self> {
                    match value {
                        Value::$variant(value) => Ok(value),
                        other => Err(Error::new(ErrorKind::TypeMismatch {
                            expected: $expected,
                            found: other.type_name(),
                        })),
                    }
                }
            }
        )*
    };
}

leaf_value_type! {
    u8, Byte, "y", "byte",
    bool, Bool, "b", "bool",
    i16, Int16, "n", "int16",
    u16, Uint16, "q", "uint16",
    i32, Int32, "i", "int32",
    u32, Uint32, "u", "uint32",
    i64, Int64, "x", "int64",
    u64, Uint64, "t", "uint64",
    f64, Double, "d", "double",
    String, Str, "s", "string",
    ObjectPath, Path, "o", "object path",
}

impl ValueType for Signature {
    #[inline]
    fn signature() -> Signature {
        Signature::from_string_unchecked("g".into())
    }

    #[inline]
    fn into_value(self) -> Value {
        Value::Sig(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Sig(value) => Ok(value),
            other => Err(Error::new(ErrorKind::TypeMismatch {
                expected: "signature",
                found: other.type_name(),
            })),
        }
    }
}

/// Variants absorb any value: the decoder has already unwrapped the inner
/// value by the time a typed destination sees it.
impl ValueType for Variant {
    #[inline]
    fn signature() -> Signature {
        Signature::from_string_unchecked("v".into())
    }

    #[inline]
    fn into_value(self) -> Value {
        Value::Variant(Box::new(self))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Variant(variant) => Ok(*variant),
            other => Ok(Variant::new(other)),
        }
    }
}

impl<T> ValueType for Vec<T>
where
    T: ValueType,
{
    fn signature() -> Signature {
        Signature::from_string_unchecked(format!("a{}", T::signature()))
    }

    fn into_value(self) -> Value {
        Value::Array {
            element: T::signature(),
            values: self.into_iter().map(T::into_value).collect(),
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array { values, .. } => values.into_iter().map(T::from_value).collect(),
            other => Err(Error::new(ErrorKind::TypeMismatch {
                expected: "array",
                found: other.type_name(),
            })),
        }
    }
}

impl<K, V> ValueType for HashMap<K, V>
where
    K: ValueType + Eq + Hash,
    V: ValueType,
{
    fn signature() -> Signature {
        Signature::from_string_unchecked(format!("a{{{}{}}}", K::signature(), V::signature()))
    }

    fn into_value(self) -> Value {
        Value::Dict {
            key: K::signature(),
            value: V::signature(),
            entries: self
                .into_iter()
                .map(|(k, v)| (k.into_value(), v.into_value()))
                .collect(),
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Dict { entries, .. } => entries
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => Err(Error::new(ErrorKind::TypeMismatch {
                expected: "dict",
                found: other.type_name(),
            })),
        }
    }
}

macro_rules! tuple_value_type {
    ($count:literal, $($ty:ident),*) => {
        impl<$($ty,)*> ValueType for ($($ty,)*)
        where
            $($ty: ValueType,)*
        {
            fn signature() -> Signature {
                let mut out = String::from("(");
                $(out.push_str($ty::signature().as_str());)*
                out.push(')');
                Signature::from_string_unchecked(out)
            }

            fn into_value(self) -> Value {
                #[allow(non_snake_case)]
                let ($($ty,)*) = self;
                Value::Struct(vec![$($ty.into_value(),)*])
            }

            fn from_value(value: Value) -> Result<Self> {
                let Value::Struct(fields) = value else {
                    return Err(Error::new(ErrorKind::TypeMismatch {
                        expected: "struct",
                        found: value.type_name(),
                    }));
                };

                if fields.len() != $count {
                    return Err(Error::new(ErrorKind::TypeMismatch {
                        expected: concat!("struct with ", $count, " fields"),
                        found: "struct",
                    }));
                }

                let mut fields = fields.into_iter();
                Ok(($($ty::from_value(fields.next().expect("field count checked"))?,)*))
            }
        }
    };
}

tuple_value_type!(2, A, B);
tuple_value_type!(3, A, B, C);
tuple_value_type!(4, A, B, C, D);
tuple_value_type!(5, A, B, C, D, E);
tuple_value_type!(6, A, B, C, D, E, F);

/// Decoding of a message body into native destinations.
///
/// Implemented for single [`ValueType`] values and for tuples of them, in
/// which case each tuple field consumes one top-level body slot in order.
pub trait FromArgs: Sized {
    /// Read this set of arguments from the decoder.
    fn from_body(decoder: &mut Decoder<'_>) -> Result<Self>;
}

impl FromArgs for () {
    #[inline]
    fn from_body(_: &mut Decoder<'_>) -> Result<Self> {
        Ok(())
    }
}

macro_rules! leaf_from_args {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromArgs for $ty {
                #[inline]
                fn from_body(decoder: &mut Decoder<'_>) -> Result<Self> {
                    decoder.read::<$ty>()
                }
            }
        )*
    };
}

leaf_from_args! {
    u8, bool, i16, u16, i32, u32, i64, u64, f64, String, ObjectPath, Signature, Variant,
}

impl<T> FromArgs for Vec<T>
where
    T: ValueType,
{
    #[inline]
    fn from_body(decoder: &mut Decoder<'_>) -> Result<Self> {
        decoder.read::<Vec<T>>()
    }
}

impl<K, V> FromArgs for HashMap<K, V>
where
    K: ValueType + Eq + Hash,
    V: ValueType,
{
    #[inline]
    fn from_body(decoder: &mut Decoder<'_>) -> Result<Self> {
        decoder.read::<HashMap<K, V>>()
    }
}

macro_rules! tuple_from_args {
    ($($ty:ident),*) => {
        impl<$($ty,)*> FromArgs for ($($ty,)*)
        where
            $($ty: ValueType,)*
        {
            fn from_body(decoder: &mut Decoder<'_>) -> Result<Self> {
                Ok(($(decoder.read::<$ty>()?,)*))
            }
        }
    };
}

tuple_from_args!(A);
tuple_from_args!(A, B);
tuple_from_args!(A, B, C);
tuple_from_args!(A, B, C, D);
tuple_from_args!(A, B, C, D, E);
tuple_from_args!(A, B, C, D, E, F);
tuple_from_args!(A, B, C, D, E, F, G);
tuple_from_args!(A, B, C, D, E, F, G, H);

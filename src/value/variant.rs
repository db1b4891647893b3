use crate::{Signature, Value};

/// A self-describing value: its signature travels with it on the wire.
///
/// # Examples
///
/// ```
/// use wirebus::{Value, Variant};
///
/// let variant = Variant::new(42i32);
/// assert_eq!(variant.signature(), "i");
/// assert_eq!(*variant.value(), Value::Int32(42));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    signature: Signature,
    value: Value,
}

impl Variant {
    /// Construct a new variant wrapping the given value.
    pub fn new<T>(value: T) -> Self
    where
        T: Into<Value>,
    {
        let value = value.into();

        Self {
            signature: value.signature(),
            value,
        }
    }

    /// The signature of the contained value.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The contained value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Unwrap the contained value.
    pub fn into_value(self) -> Value {
        self.value
    }
}

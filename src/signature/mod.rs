use std::error;
use std::fmt;

pub(crate) use self::validation::{element_end, validate};
mod validation;


/// The maximum length of a signature, in bytes.
pub(crate) const MAX_SIGNATURE_LENGTH: usize = 255;
/// The maximum nesting depth of container types in a signature.
pub(crate) const MAX_DEPTH: usize = 32;

/// A validated D-Bus type signature.
///
/// A signature describes a sequence of typed slots as a compact string over
/// the alphabet `y b n q i u x t d s o g a ( ) { } v`.
///
/// # Examples
///
/// ```
/// use wirebus::Signature;
///
/// assert!(Signature::new("a{sv}").is_ok());
/// assert!(Signature::new("a").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    /// Construct a new validated signature.
    ///
    /// # Errors
    ///
    /// Errors if the argument is not a valid signature.
    pub fn new<S>(signature: S) -> Result<Self, SignatureError>
    where
        S: Into<String>,
    {
        let signature = signature.into();
        validate(signature.as_bytes())?;
        Ok(Self(signature))
    }

    /// Construct the empty signature.
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Construct a signature which is known to be valid.
    pub(crate) fn from_string_unchecked(signature: String) -> Self {
        debug_assert!(validate(signature.as_bytes()).is_ok());
        Self(signature)
    }

    /// Get the signature as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the signature as a byte slice.
    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Test if the signature is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The length of the signature in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for Signature {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature").field(&self.0).finish()
    }
}

impl fmt::Display for Signature {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Signature {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Signature {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Signature {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::str::FromStr for Signature {
    type Err = SignatureError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// An error raised when validation of a [`Signature`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SignatureError {
    /// The signature is longer than 255 bytes.
    TooLong,
    /// An unknown type code was encountered.
    UnknownTypeCode(u8),
    /// An `a` was not followed by an element signature.
    MissingArrayElementType,
    /// A `(` was never closed.
    StructNotClosed,
    /// A struct has no fields.
    StructHasNoFields,
    /// A `{` was never closed, or holds the wrong number of fields.
    InvalidDictEntry,
    /// A dict key is not a basic type.
    DictKeyMustBeBasicType,
    /// A `{…}` occurred outside of an array.
    DictEntryNotInsideArray,
    /// Containers are nested too deeply.
    ExceededMaximumDepth,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::TooLong => write!(f, "Signature too long"),
            SignatureError::UnknownTypeCode(code) => {
                write!(f, "Unknown type code: {:?}", *code as char)
            }
            SignatureError::MissingArrayElementType => {
                write!(f, "Missing array element type")
            }
            SignatureError::StructNotClosed => write!(f, "Struct started but not ended"),
            SignatureError::StructHasNoFields => write!(f, "Struct has no fields"),
            SignatureError::InvalidDictEntry => write!(f, "Invalid dict entry"),
            SignatureError::DictKeyMustBeBasicType => {
                write!(f, "Dict key must be a basic type")
            }
            SignatureError::DictEntryNotInsideArray => {
                write!(f, "Dict entry not inside an array")
            }
            SignatureError::ExceededMaximumDepth => {
                write!(f, "Exceeded maximum container depth")
            }
        }
    }
}

impl error::Error for SignatureError {}

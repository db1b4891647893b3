use crate::error::{Error, ErrorKind};

use super::{SignatureError, MAX_DEPTH, MAX_SIGNATURE_LENGTH};

/// Test if a type code is a basic (non-container) type.
fn is_basic(code: u8) -> bool {
    matches!(
        code,
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g'
    )
}

/// Validate a complete signature: a sequence of single complete types.
pub(crate) fn validate(bytes: &[u8]) -> Result<(), SignatureError> {
    if bytes.len() > MAX_SIGNATURE_LENGTH {
        return Err(SignatureError::TooLong);
    }

    let mut pos = 0;

    while pos < bytes.len() {
        pos = validate_single(bytes, pos, 0)?;
    }

    Ok(())
}

/// Validate one single complete type starting at `pos`, returning the
/// position one past its end.
fn validate_single(bytes: &[u8], pos: usize, depth: usize) -> Result<usize, SignatureError> {
    if depth > MAX_DEPTH {
        return Err(SignatureError::ExceededMaximumDepth);
    }

    let Some(&code) = bytes.get(pos) else {
        return Err(SignatureError::MissingArrayElementType);
    };

    match code {
        _ if is_basic(code) => Ok(pos + 1),
        b'v' => Ok(pos + 1),
        b'a' => {
            if let Some(b'{') = bytes.get(pos + 1) {
                return validate_dict_entry(bytes, pos + 1, depth + 1);
            }

            validate_single(bytes, pos + 1, depth + 1)
        }
        b'(' => {
            let mut p = pos + 1;

            if let Some(b')') = bytes.get(p) {
                return Err(SignatureError::StructHasNoFields);
            }

            loop {
                match bytes.get(p) {
                    None => return Err(SignatureError::StructNotClosed),
                    Some(b')') => return Ok(p + 1),
                    Some(..) => {
                        p = validate_single(bytes, p, depth + 1)?;
                    }
                }
            }
        }
        b'{' => Err(SignatureError::DictEntryNotInsideArray),
        _ => Err(SignatureError::UnknownTypeCode(code)),
    }
}

/// Validate a `{KV}` dict entry starting at the opening brace.
fn validate_dict_entry(bytes: &[u8], pos: usize, depth: usize) -> Result<usize, SignatureError> {
    if depth > MAX_DEPTH {
        return Err(SignatureError::ExceededMaximumDepth);
    }

    debug_assert_eq!(bytes.get(pos), Some(&b'{'));

    let Some(&key) = bytes.get(pos + 1) else {
        return Err(SignatureError::InvalidDictEntry);
    };

    if !is_basic(key) {
        return Err(SignatureError::DictKeyMustBeBasicType);
    }

    let end = validate_single(bytes, pos + 2, depth + 1)?;

    match bytes.get(end) {
        Some(b'}') => Ok(end + 1),
        _ => Err(SignatureError::InvalidDictEntry),
    }
}

/// Find the end of one element signature in a validated signature, starting
/// at `pos`. Used by the decoder to slice element signatures out of
/// container signatures.
pub(crate) fn element_end(bytes: &[u8], pos: usize) -> Result<usize, Error> {
    let Some(&code) = bytes.get(pos) else {
        return Err(Error::new(ErrorKind::SignatureTooShort));
    };

    match code {
        b'a' => element_end(bytes, pos + 1),
        b'(' => {
            let mut p = pos + 1;

            while bytes.get(p) != Some(&b')') {
                if p >= bytes.len() {
                    return Err(Error::new(ErrorKind::SignatureTooShort));
                }

                p = element_end(bytes, p)?;
            }

            Ok(p + 1)
        }
        b'{' => {
            let key_end = element_end(bytes, pos + 1)?;
            let value_end = element_end(bytes, key_end)?;

            match bytes.get(value_end) {
                Some(b'}') => Ok(value_end + 1),
                _ => Err(Error::new(ErrorKind::SignatureTooShort)),
            }
        }
        _ => Ok(pos + 1),
    }
}

use crate::error::{Error, ErrorKind, Result};
use crate::protocol::Endianness;
use crate::signature::{element_end, validate};
use crate::value::ValueType;
use crate::{ObjectPath, Signature, Value};

/// A wire format decoder.
///
/// The decoder walks two cursors in lockstep: one into the byte buffer and
/// one into the signature. Each read consumes one element signature and the
/// matching bytes.
///
/// # Examples
///
/// ```
/// use wirebus::{Decoder, Signature, Value};
/// use wirebus::protocol::Endianness;
///
/// let signature = Signature::new("ai")?;
/// let data = [8, 0, 0, 0, 42, 0, 0, 0, 164, 1, 0, 0];
///
/// let mut decoder = Decoder::new(&signature, &data, Endianness::Little);
/// let values: Vec<i32> = decoder.read()?;
///
/// assert_eq!(values, [42, 420]);
/// assert!(!decoder.has_more());
/// # Ok::<_, wirebus::Error>(())
/// ```
pub struct Decoder<'a> {
    data: &'a [u8],
    signature: &'a str,
    endianness: Endianness,
    data_offset: usize,
    sig_offset: usize,
}

impl<'a> Decoder<'a> {
    /// Construct a new decoder over the given signature and bytes.
    pub fn new(signature: &'a Signature, data: &'a [u8], endianness: Endianness) -> Self {
        Self {
            data,
            signature: signature.as_str(),
            endianness,
            data_offset: 0,
            sig_offset: 0,
        }
    }

    /// Construct a decoder over a raw signature string with explicit
    /// starting offsets. Used by the message codec to pick the header field
    /// array out of a frame.
    pub(crate) fn with_offsets(
        signature: &'a str,
        data: &'a [u8],
        endianness: Endianness,
        data_offset: usize,
    ) -> Self {
        debug_assert!(validate(signature.as_bytes()).is_ok());

        Self {
            data,
            signature,
            endianness,
            data_offset,
            sig_offset: 0,
        }
    }

    /// Test if further elements remain in the signature.
    pub fn has_more(&self) -> bool {
        self.sig_offset < self.signature.len()
    }

    /// The current offset into the byte buffer.
    pub(crate) fn data_offset(&self) -> usize {
        self.data_offset
    }

    /// Read the next element into a typed destination.
    ///
    /// # Errors
    ///
    /// Errors with a type mismatch if the wire type does not line up with
    /// the destination type.
    pub fn read<T>(&mut self) -> Result<T>
    where
        T: ValueType,
    {
        T::from_value(self.read_value()?)
    }

    /// Read the next element as a dynamically typed value.
    ///
    /// Variants decode to their payload directly: the wrapper is a wire
    /// artifact, not part of the canonical representation.
    pub fn read_value(&mut self) -> Result<Value> {
        let mut sig_offset = self.sig_offset;

        let value = decode_element(
            self.data,
            self.endianness,
            self.signature.as_bytes(),
            &mut sig_offset,
            &mut self.data_offset,
        )?;

        self.sig_offset = sig_offset;
        Ok(value)
    }
}

fn align_to(offset: usize, alignment: usize) -> usize {
    offset + offset.wrapping_neg() % alignment
}

/// Decode one element signature worth of bytes.
///
/// This is a free function rather than a method so that variant payloads,
/// whose signature is read out of the data itself, can recurse with a
/// different signature buffer.
fn decode_element(
    data: &[u8],
    endianness: Endianness,
    signature: &[u8],
    sig_offset: &mut usize,
    data_offset: &mut usize,
) -> Result<Value> {
    let Some(&code) = signature.get(*sig_offset) else {
        return Err(Error::new(ErrorKind::SignatureTooShort));
    };

    *sig_offset += 1;

    match code {
        b'y' => Ok(Value::Byte(load_u8(data, data_offset)?)),
        b'b' => Ok(Value::Bool(
            load_u32(data, endianness, data_offset)? != 0,
        )),
        b'n' => Ok(Value::Int16(load_u16(data, endianness, data_offset)? as i16)),
        b'q' => Ok(Value::Uint16(load_u16(data, endianness, data_offset)?)),
        b'i' => Ok(Value::Int32(load_u32(data, endianness, data_offset)? as i32)),
        b'u' => Ok(Value::Uint32(load_u32(data, endianness, data_offset)?)),
        b'x' => Ok(Value::Int64(load_u64(data, endianness, data_offset)? as i64)),
        b't' => Ok(Value::Uint64(load_u64(data, endianness, data_offset)?)),
        b'd' => Ok(Value::Double(f64::from_bits(load_u64(
            data,
            endianness,
            data_offset,
        )?))),
        b's' => Ok(Value::Str(load_string(data, endianness, data_offset)?)),
        b'o' => {
            let path = load_string(data, endianness, data_offset)?;
            Ok(Value::Path(ObjectPath::new(path).map_err(Error::from)?))
        }
        b'g' => {
            let signature = load_signature(data, data_offset)?;
            Ok(Value::Sig(Signature::new(signature).map_err(Error::from)?))
        }
        b'a' => {
            let element_start = *sig_offset;
            let element_stop = element_end(signature, element_start)?;

            let length = load_u32(data, endianness, data_offset)?;

            if length > crate::protocol::MAX_ARRAY_LENGTH {
                return Err(Error::new(ErrorKind::ArrayTooLong(length)));
            }

            let length = length as usize;
            let end = data_offset.checked_add(length).ok_or_else(|| {
                Error::new(ErrorKind::BufferTooShort)
            })?;

            if data.len() < end {
                return Err(Error::new(ErrorKind::BufferTooShort));
            }

            let value = if signature.get(element_start) == Some(&b'{') {
                let mut entries = Vec::new();

                while *data_offset < end {
                    *data_offset = align_to(*data_offset, 8);

                    let mut entry_sig = element_start + 1;
                    let key = decode_element(data, endianness, signature, &mut entry_sig, data_offset)?;
                    let value = decode_element(data, endianness, signature, &mut entry_sig, data_offset)?;
                    entries.push((key, value));
                }

                let key_end = element_end(signature, element_start + 1)?;

                Value::Dict {
                    key: sig_slice(signature, element_start + 1, key_end)?,
                    value: sig_slice(signature, key_end, element_stop - 1)?,
                    entries,
                }
            } else {
                let mut values = Vec::new();

                while *data_offset < end {
                    let mut element_sig = element_start;
                    values.push(decode_element(
                        data,
                        endianness,
                        signature,
                        &mut element_sig,
                        data_offset,
                    )?);
                }

                Value::Array {
                    element: sig_slice(signature, element_start, element_stop)?,
                    values,
                }
            };

            *sig_offset = element_stop;
            Ok(value)
        }
        b'(' => {
            *data_offset = align_to(*data_offset, 8);

            let mut fields = Vec::new();

            loop {
                match signature.get(*sig_offset) {
                    Some(b')') => {
                        *sig_offset += 1;
                        break;
                    }
                    Some(..) => {
                        fields.push(decode_element(
                            data, endianness, signature, sig_offset, data_offset,
                        )?);
                    }
                    None => return Err(Error::new(ErrorKind::SignatureTooShort)),
                }
            }

            Ok(Value::Struct(fields))
        }
        b'v' => {
            let inner = load_signature(data, data_offset)?;
            let inner = Signature::new(inner).map_err(Error::from)?;

            let mut inner_sig = 0;
            decode_element(
                data,
                endianness,
                inner.as_bytes(),
                &mut inner_sig,
                data_offset,
            )
        }
        _ => Err(Error::new(ErrorKind::TypeMismatch {
            expected: "element type code",
            found: "unknown type code",
        })),
    }
}

fn sig_slice(signature: &[u8], start: usize, end: usize) -> Result<Signature> {
    let bytes = signature
        .get(start..end)
        .ok_or_else(|| Error::new(ErrorKind::SignatureTooShort))?;

    let s = std::str::from_utf8(bytes)?;
    Ok(Signature::new(s).map_err(Error::from)?)
}

fn load_u8(data: &[u8], offset: &mut usize) -> Result<u8> {
    let Some(&value) = data.get(*offset) else {
        return Err(Error::new(ErrorKind::BufferTooShort));
    };

    *offset += 1;
    Ok(value)
}

fn load_u16(data: &[u8], endianness: Endianness, offset: &mut usize) -> Result<u16> {
    *offset = align_to(*offset, 2);

    let Some(bytes) = data.get(*offset..*offset + 2) else {
        return Err(Error::new(ErrorKind::BufferTooShort));
    };

    *offset += 2;
    let bytes = [bytes[0], bytes[1]];

    Ok(match endianness {
        Endianness::Little => u16::from_le_bytes(bytes),
        Endianness::Big => u16::from_be_bytes(bytes),
    })
}

fn load_u32(data: &[u8], endianness: Endianness, offset: &mut usize) -> Result<u32> {
    *offset = align_to(*offset, 4);

    let Some(bytes) = data.get(*offset..*offset + 4) else {
        return Err(Error::new(ErrorKind::BufferTooShort));
    };

    *offset += 4;
    let bytes = [bytes[0], bytes[1], bytes[2], bytes[3]];

    Ok(match endianness {
        Endianness::Little => u32::from_le_bytes(bytes),
        Endianness::Big => u32::from_be_bytes(bytes),
    })
}

fn load_u64(data: &[u8], endianness: Endianness, offset: &mut usize) -> Result<u64> {
    *offset = align_to(*offset, 8);

    let Some(bytes) = data.get(*offset..*offset + 8) else {
        return Err(Error::new(ErrorKind::BufferTooShort));
    };

    *offset += 8;

    let bytes: [u8; 8] = bytes.try_into().expect("slice length checked");

    Ok(match endianness {
        Endianness::Little => u64::from_le_bytes(bytes),
        Endianness::Big => u64::from_be_bytes(bytes),
    })
}

fn load_string(data: &[u8], endianness: Endianness, offset: &mut usize) -> Result<String> {
    let length = load_u32(data, endianness, offset)? as usize;

    // One extra byte for the nul terminator.
    let Some(bytes) = data.get(*offset..*offset + length) else {
        return Err(Error::new(ErrorKind::BufferTooShort));
    };

    if data.get(*offset + length).is_none() {
        return Err(Error::new(ErrorKind::BufferTooShort));
    }

    let value = std::str::from_utf8(bytes)?.to_owned();
    *offset += length + 1;
    Ok(value)
}

fn load_signature(data: &[u8], offset: &mut usize) -> Result<String> {
    let length = load_u8(data, offset)? as usize;

    let Some(bytes) = data.get(*offset..*offset + length) else {
        return Err(Error::new(ErrorKind::BufferTooShort));
    };

    if data.get(*offset + length).is_none() {
        return Err(Error::new(ErrorKind::BufferTooShort));
    }

    let value = std::str::from_utf8(bytes)?.to_owned();
    *offset += length + 1;
    Ok(value)
}

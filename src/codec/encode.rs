use crate::protocol::Endianness;
use crate::signature::MAX_SIGNATURE_LENGTH;
use crate::{Signature, SignatureError, Value};

/// A wire format encoder.
///
/// The encoder owns two accumulators: the marshalled bytes and the signature
/// of everything appended so far. Values are aligned according to their wire
/// type before being written.
///
/// Encoders are composable: a child encoder writing into the middle of an
/// enclosing buffer is constructed with the byte offset it starts at, so
/// that its alignment decisions agree with the parent.
///
/// # Examples
///
/// ```
/// use wirebus::Encoder;
///
/// let mut enc = Encoder::new();
/// enc.append(vec![42i32, 420])?;
///
/// assert_eq!(enc.signature(), "ai");
/// assert_eq!(enc.data(), &[8, 0, 0, 0, 42, 0, 0, 0, 164, 1, 0, 0]);
/// # Ok::<_, wirebus::SignatureError>(())
/// ```
pub struct Encoder {
    endianness: Endianness,
    base: usize,
    data: Vec<u8>,
    signature: String,
}

impl Encoder {
    /// Construct a new little-endian encoder starting at offset zero.
    pub fn new() -> Self {
        Self::with_endianness(Endianness::Little)
    }

    /// Construct a new encoder with an explicit endianness.
    pub fn with_endianness(endianness: Endianness) -> Self {
        Self {
            endianness,
            base: 0,
            data: Vec::new(),
            signature: String::new(),
        }
    }

    /// Construct an encoder whose output will be placed at byte offset
    /// `base` of an enclosing buffer.
    pub fn with_base(endianness: Endianness, base: usize) -> Self {
        Self {
            endianness,
            base,
            data: Vec::new(),
            signature: String::new(),
        }
    }

    /// Resume encoding with previously accumulated output, as when appending
    /// arguments to a message body.
    pub(crate) fn resume(endianness: Endianness, signature: &Signature, data: Vec<u8>) -> Self {
        Self {
            endianness,
            base: 0,
            data,
            signature: signature.as_str().to_owned(),
        }
    }

    /// Append a value, growing both the byte buffer and the signature.
    ///
    /// # Errors
    ///
    /// Errors if the accumulated signature would exceed the protocol limit
    /// of 255 bytes.
    pub fn append<T>(&mut self, value: T) -> Result<(), SignatureError>
    where
        T: Into<Value>,
    {
        self.append_value(&value.into())
    }

    /// Append a dynamically typed value.
    pub fn append_value(&mut self, value: &Value) -> Result<(), SignatureError> {
        let signature_len = self.signature.len();
        value.write_signature(&mut self.signature);

        if self.signature.len() > MAX_SIGNATURE_LENGTH {
            self.signature.truncate(signature_len);
            return Err(SignatureError::TooLong);
        }

        self.encode_value(value);
        Ok(())
    }

    /// The signature of everything appended so far.
    pub fn signature(&self) -> Signature {
        Signature::from_string_unchecked(self.signature.clone())
    }

    /// The bytes encoded so far.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Extract the accumulated signature and bytes.
    pub fn finish(self) -> (Signature, Vec<u8>) {
        (Signature::from_string_unchecked(self.signature), self.data)
    }

    /// Pad the buffer with zero bytes until the absolute offset is a
    /// multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) {
        while (self.base + self.data.len()) % alignment != 0 {
            self.data.push(0);
        }
    }

    /// Append raw bytes without alignment or signature bookkeeping. Used for
    /// the pre-encoded body following a message header.
    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Encode a value without touching the signature accumulator.
    ///
    /// Container bodies go through here: their inner type codes belong to
    /// the container's own signature, not the parent's.
    fn encode_value(&mut self, value: &Value) {
        match value {
            Value::Byte(v) => self.data.push(*v),
            Value::Bool(v) => self.put_u32(*v as u32),
            Value::Int16(v) => self.put_u16(*v as u16),
            Value::Uint16(v) => self.put_u16(*v),
            Value::Int32(v) => self.put_u32(*v as u32),
            Value::Uint32(v) => self.put_u32(*v),
            Value::Int64(v) => self.put_u64(*v as u64),
            Value::Uint64(v) => self.put_u64(*v),
            Value::Double(v) => self.put_u64(v.to_bits()),
            Value::Str(v) => self.put_string(v),
            Value::Path(v) => self.put_string(v.as_str()),
            Value::Sig(v) => self.put_signature(v),
            Value::Array { values, .. } => {
                self.put_array(|enc| {
                    for value in values {
                        enc.encode_value(value);
                    }
                });
            }
            Value::Dict { entries, .. } => {
                self.put_array(|enc| {
                    for (key, value) in entries {
                        enc.align(8);
                        enc.encode_value(key);
                        enc.encode_value(value);
                    }
                });
            }
            Value::Struct(fields) => {
                self.align(8);

                for field in fields {
                    self.encode_value(field);
                }
            }
            Value::Variant(variant) => {
                self.put_signature(variant.signature());
                self.encode_value(variant.value());
            }
        }
    }

    fn put_u16(&mut self, value: u16) {
        self.align(2);

        match self.endianness {
            Endianness::Little => self.data.extend_from_slice(&value.to_le_bytes()),
            Endianness::Big => self.data.extend_from_slice(&value.to_be_bytes()),
        }
    }

    fn put_u32(&mut self, value: u32) {
        self.align(4);
        self.put_u32_unaligned(value);
    }

    fn put_u32_unaligned(&mut self, value: u32) {
        match self.endianness {
            Endianness::Little => self.data.extend_from_slice(&value.to_le_bytes()),
            Endianness::Big => self.data.extend_from_slice(&value.to_be_bytes()),
        }
    }

    fn put_u64(&mut self, value: u64) {
        self.align(8);

        match self.endianness {
            Endianness::Little => self.data.extend_from_slice(&value.to_le_bytes()),
            Endianness::Big => self.data.extend_from_slice(&value.to_be_bytes()),
        }
    }

    fn put_string(&mut self, value: &str) {
        self.put_u32(value.len() as u32);
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
    }

    fn put_signature(&mut self, value: &Signature) {
        self.data.push(value.len() as u8);
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
    }

    /// Write an array: a 4-byte content length, followed by the content
    /// produced by `body`.
    ///
    /// The content length covers everything after the length field,
    /// including any padding the first element writes to reach its own
    /// alignment. An empty array therefore has length zero.
    fn put_array(&mut self, body: impl FnOnce(&mut Self)) {
        self.align(4);

        let length_at = self.data.len();
        self.put_u32_unaligned(0);

        let content_at = self.data.len();
        body(self);

        let length = (self.data.len() - content_at) as u32;

        let bytes = match self.endianness {
            Endianness::Little => length.to_le_bytes(),
            Endianness::Big => length.to_be_bytes(),
        };

        self.data[length_at..length_at + 4].copy_from_slice(&bytes);
    }
}

impl Default for Encoder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

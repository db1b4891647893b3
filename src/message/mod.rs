use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{Decoder, Encoder};
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{
    fields, Endianness, Flags, MessageType, MAX_ARRAY_LENGTH, MAX_BODY_LENGTH, PROTOCOL_VERSION,
};
use crate::utils::padding_to;
use crate::value::FromArgs;
use crate::{ObjectPath, Signature, Value, Variant};

#[cfg(test)]
mod tests;

/// The signature of the fixed part of a message header.
const HEADER_SIGNATURE: &str = "yyyyuu";
/// The signature of the header field array.
const FIELDS_SIGNATURE: &str = "a(yv)";
/// The size of the fixed header plus the field array length.
const HEADER_PREFIX: usize = 16;

/// A D-Bus message.
///
/// Messages come in four shapes: method calls, method returns, errors and
/// signals. A message is immutable once handed to the connection; the
/// connection assigns its serial.
///
/// # Examples
///
/// ```
/// use wirebus::{Message, ObjectPath};
///
/// let mut msg = Message::method_call(ObjectPath::new("/org/freedesktop/DBus")?, "NameHasOwner")
///     .with_destination("org.freedesktop.DBus")
///     .with_interface("org.freedesktop.DBus");
///
/// msg.append("org.freedesktop.DBus")?;
/// assert_eq!(msg.signature(), "s");
/// # Ok::<_, wirebus::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    message_type: MessageType,
    flags: Flags,
    protocol: u8,
    serial: u32,
    path: Option<ObjectPath>,
    interface: Option<String>,
    member: Option<String>,
    error_name: Option<String>,
    reply_serial: Option<u32>,
    destination: Option<String>,
    sender: Option<String>,
    signature: Signature,
    body: Vec<u8>,
    endianness: Endianness,
}

impl Message {
    fn empty(message_type: MessageType) -> Self {
        Self {
            message_type,
            flags: Flags::EMPTY,
            protocol: PROTOCOL_VERSION,
            serial: 0,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            signature: Signature::empty(),
            body: Vec::new(),
            endianness: Endianness::Little,
        }
    }

    /// Construct a new method call message.
    pub fn method_call(path: ObjectPath, member: impl Into<String>) -> Self {
        let mut msg = Self::empty(MessageType::MethodCall);
        msg.path = Some(path);
        msg.member = Some(member.into());
        msg
    }

    /// Construct a new signal message.
    pub fn signal(path: ObjectPath, interface: impl Into<String>, member: impl Into<String>) -> Self {
        let mut msg = Self::empty(MessageType::Signal);
        msg.path = Some(path);
        msg.interface = Some(interface.into());
        msg.member = Some(member.into());
        msg
    }

    /// Construct an empty method return replying to this message.
    ///
    /// The reply serial is taken from this message and the destination from
    /// its sender. The serial of the reply itself is assigned by the
    /// connection on send.
    pub fn method_return(&self) -> Self {
        let mut msg = Self::empty(MessageType::MethodReturn);
        msg.reply_serial = Some(self.serial);
        msg.destination = self.sender.clone();
        msg
    }

    /// Construct an error reply to this message.
    ///
    /// The body carries the human-readable error text as a single string.
    pub fn error_reply(&self, error_name: impl Into<String>, text: &str) -> Result<Self> {
        let mut msg = Self::empty(MessageType::Error);
        msg.error_name = Some(error_name.into());
        msg.reply_serial = Some(self.serial);
        msg.destination = self.sender.clone();
        msg.append(text)?;
        Ok(msg)
    }

    /// Set the destination of the message.
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Set the interface of the message.
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Set the sender of the message.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Set the flags of the message.
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Append an argument to the body of the message.
    ///
    /// # Errors
    ///
    /// Errors if the body signature would exceed the protocol limit.
    pub fn append<T>(&mut self, value: T) -> Result<()>
    where
        T: Into<Value>,
    {
        let mut enc = Encoder::resume(self.endianness, &self.signature, std::mem::take(&mut self.body));
        let result = enc.append(value);
        let (signature, body) = enc.finish();
        self.signature = signature;
        self.body = body;
        result?;
        Ok(())
    }

    /// Append a list of dynamically typed arguments to the body.
    pub fn append_all(&mut self, values: Vec<Value>) -> Result<()> {
        for value in values {
            self.append(value)?;
        }

        Ok(())
    }

    /// The type of the message.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The flags of the message.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// The serial of the message. Zero until assigned by the connection.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub(crate) fn set_serial(&mut self, serial: u32) {
        self.serial = serial;
    }

    /// The object path of the message, if present.
    pub fn path(&self) -> Option<&ObjectPath> {
        self.path.as_ref()
    }

    /// The interface of the message, if present.
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// The member of the message, if present.
    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }

    /// The error name of the message, if present.
    pub fn error_name(&self) -> Option<&str> {
        self.error_name.as_deref()
    }

    /// The serial this message replies to, if present.
    pub fn reply_serial(&self) -> Option<u32> {
        self.reply_serial
    }

    /// The destination of the message, if present.
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// The sender of the message, if present.
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// The signature of the body.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The endianness of the message frame.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// A decoder over the message body.
    pub fn body(&self) -> Decoder<'_> {
        Decoder::new(&self.signature, &self.body, self.endianness)
    }

    /// Decode the body into typed destinations.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # fn x(msg: wirebus::Message) -> wirebus::Result<()> {
    /// let (name, old_owner, new_owner): (String, String, String) = msg.args()?;
    /// # Ok(()) }
    /// ```
    pub fn args<T>(&self) -> Result<T>
    where
        T: FromArgs,
    {
        T::from_body(&mut self.body())
    }

    /// Decode the entire body into dynamically typed values.
    ///
    /// # Errors
    ///
    /// Errors if decoding the declared signature does not consume the body
    /// exactly.
    pub fn body_values(&self) -> Result<Vec<Value>> {
        let mut decoder = self.body();
        let mut values = Vec::new();

        while decoder.has_more() {
            values.push(decoder.read_value()?);
        }

        if decoder.data_offset() != self.body.len() {
            return Err(Error::new(ErrorKind::BodyLengthMismatch {
                declared: self.body.len(),
                decoded: decoder.data_offset(),
            }));
        }

        Ok(values)
    }

    /// The first body argument, if it is a string.
    pub(crate) fn arg0_str(&self) -> Option<String> {
        if !self.signature.as_str().starts_with('s') {
            return None;
        }

        match self.body().read_value() {
            Ok(Value::Str(value)) => Some(value),
            _ => None,
        }
    }

    /// Convert an error-typed message into an [`Error`].
    pub fn as_remote_error(&self) -> Error {
        let name = self.error_name.clone().unwrap_or_default();
        let message = self.arg0_str().unwrap_or_default();
        Error::new(ErrorKind::Remote { name, message })
    }

    /// Marshal the message into a single wire frame.
    ///
    /// # Errors
    ///
    /// Errors if no serial has been assigned or if the body exceeds the
    /// maximum message size.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.serial == 0 {
            return Err(Error::new(ErrorKind::ZeroSerial));
        }

        if self.body.len() > MAX_BODY_LENGTH as usize {
            return Err(Error::new(ErrorKind::BodyTooLong(self.body.len() as u32)));
        }

        let mut enc = Encoder::with_endianness(self.endianness);
        enc.append(self.endianness.to_byte())?;
        enc.append(self.message_type as u8)?;
        enc.append(self.flags.bits())?;
        enc.append(self.protocol)?;
        enc.append(self.body.len() as u32)?;
        enc.append(self.serial)?;

        enc.append_value(&Value::Array {
            element: Signature::from_string_unchecked("(yv)".into()),
            values: self.header_fields(),
        })?;

        enc.align(8);
        enc.extend_from_slice(&self.body);

        let (_, data) = enc.finish();
        Ok(data)
    }

    /// The header field array, in field code order.
    fn header_fields(&self) -> Vec<Value> {
        fn field(code: u8, value: impl Into<Value>) -> Value {
            Value::Struct(vec![
                Value::Byte(code),
                Value::Variant(Box::new(Variant::new(value))),
            ])
        }

        let mut out = Vec::new();

        if let Some(path) = &self.path {
            out.push(field(fields::PATH, path.clone()));
        }

        if let Some(interface) = &self.interface {
            out.push(field(fields::INTERFACE, interface.as_str()));
        }

        if let Some(member) = &self.member {
            out.push(field(fields::MEMBER, member.as_str()));
        }

        if let Some(error_name) = &self.error_name {
            out.push(field(fields::ERROR_NAME, error_name.as_str()));
        }

        if let Some(reply_serial) = self.reply_serial {
            out.push(field(fields::REPLY_SERIAL, reply_serial));
        }

        if let Some(destination) = &self.destination {
            out.push(field(fields::DESTINATION, destination.as_str()));
        }

        if let Some(sender) = &self.sender {
            out.push(field(fields::SENDER, sender.as_str()));
        }

        if !self.signature.is_empty() {
            out.push(field(fields::SIGNATURE, self.signature.clone()));
        }

        out
    }

    /// Unmarshal a message from the start of a byte buffer, returning the
    /// message and the number of bytes consumed.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize)> {
        let Some(header) = data.get(..HEADER_PREFIX) else {
            return Err(Error::new(ErrorKind::BufferTooShort));
        };

        let fixed = FixedHeader::parse(header)?;

        let fields_end = HEADER_PREFIX + fixed.fields_length;
        let body_start = fields_end + padding_to(fields_end, 8);
        let total = body_start + fixed.body_length;

        if data.len() < total {
            return Err(Error::new(ErrorKind::BufferTooShort));
        }

        let msg = Self::from_parts(fixed, &data[..fields_end], data[body_start..total].to_vec())?;
        Ok((msg, total))
    }

    /// Read a single message frame from a stream.
    ///
    /// Failure to read any prefix of the frame is fatal to the connection.
    pub(crate) async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = vec![0u8; HEADER_PREFIX];
        reader.read_exact(&mut header).await?;

        let fixed = FixedHeader::parse(&header)?;

        let fields_end = HEADER_PREFIX + fixed.fields_length;
        let rest = fixed.fields_length + padding_to(fields_end, 8);

        header.resize(HEADER_PREFIX + rest, 0);
        reader.read_exact(&mut header[HEADER_PREFIX..]).await?;

        let mut body = vec![0u8; fixed.body_length];
        reader.read_exact(&mut body).await?;

        Self::from_parts(fixed, &header[..fields_end], body)
    }

    /// Assemble a message from its parsed fixed header, the frame prefix up
    /// to the end of the header field array, and the body.
    fn from_parts(fixed: FixedHeader, prefix: &[u8], body: Vec<u8>) -> Result<Self> {
        let mut msg = Self::empty(fixed.message_type);
        msg.flags = fixed.flags;
        msg.protocol = fixed.protocol;
        msg.serial = fixed.serial;
        msg.endianness = fixed.endianness;
        msg.body = body;

        let mut decoder =
            Decoder::with_offsets(FIELDS_SIGNATURE, prefix, fixed.endianness, HEADER_PREFIX - 4);

        let Value::Array { values, .. } = decoder.read_value()? else {
            return Err(Error::new(ErrorKind::TypeMismatch {
                expected: "header field array",
                found: "other",
            }));
        };

        for entry in values {
            let Value::Struct(mut parts) = entry else {
                return Err(Error::new(ErrorKind::TypeMismatch {
                    expected: "header field struct",
                    found: "other",
                }));
            };

            if parts.len() != 2 {
                return Err(Error::new(ErrorKind::TypeMismatch {
                    expected: "header field struct with 2 fields",
                    found: "other",
                }));
            }

            let value = parts.pop().expect("length checked");
            let code = parts.pop().expect("length checked");

            let Value::Byte(code) = code else {
                return Err(Error::new(ErrorKind::TypeMismatch {
                    expected: "header field code",
                    found: code.type_name(),
                }));
            };

            match (code, value) {
                (fields::PATH, Value::Path(path)) => msg.path = Some(path),
                (fields::INTERFACE, Value::Str(interface)) => msg.interface = Some(interface),
                (fields::MEMBER, Value::Str(member)) => msg.member = Some(member),
                (fields::ERROR_NAME, Value::Str(name)) => msg.error_name = Some(name),
                (fields::REPLY_SERIAL, Value::Uint32(serial)) => msg.reply_serial = Some(serial),
                (fields::DESTINATION, Value::Str(dest)) => msg.destination = Some(dest),
                (fields::SENDER, Value::Str(sender)) => msg.sender = Some(sender),
                (fields::SIGNATURE, Value::Sig(signature)) => msg.signature = signature,
                // Unknown field codes are ignored for forward
                // compatibility.
                _ => {}
            }
        }

        Ok(msg)
    }
}

/// The fixed 16-byte prefix of a frame: the `yyyyuu` header plus the length
/// of the header field array.
struct FixedHeader {
    endianness: Endianness,
    message_type: MessageType,
    flags: Flags,
    protocol: u8,
    body_length: usize,
    serial: u32,
    fields_length: usize,
}

impl FixedHeader {
    fn parse(data: &[u8]) -> Result<Self> {
        debug_assert_eq!(data.len(), HEADER_PREFIX);

        let Some(endianness) = Endianness::from_byte(data[0]) else {
            return Err(Error::new(ErrorKind::UnknownEndian(data[0])));
        };

        let mut decoder = Decoder::with_offsets(HEADER_SIGNATURE, data, endianness, 0);
        let _ = decoder.read::<u8>()?;
        let message_type = decoder.read::<u8>()?;
        let flags = decoder.read::<u8>()?;
        let protocol = decoder.read::<u8>()?;
        let body_length = decoder.read::<u32>()?;
        let serial = decoder.read::<u32>()?;

        let mut tail = Decoder::with_offsets("u", data, endianness, HEADER_PREFIX - 4);
        let fields_length = tail.read::<u32>()?;

        let Some(message_type) = MessageType::from_u8(message_type) else {
            return Err(Error::new(ErrorKind::TypeMismatch {
                expected: "message type",
                found: "unknown message type",
            }));
        };

        if body_length > MAX_BODY_LENGTH {
            return Err(Error::new(ErrorKind::BodyTooLong(body_length)));
        }

        if fields_length > MAX_ARRAY_LENGTH {
            return Err(Error::new(ErrorKind::HeaderTooLong(fields_length)));
        }

        Ok(Self {
            endianness,
            message_type,
            flags: Flags::from_bits(flags),
            protocol,
            body_length: body_length as usize,
            serial,
            fields_length: fields_length as usize,
        })
    }
}

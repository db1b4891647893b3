pub use self::encode::Encoder;
mod encode;

pub use self::decode::Decoder;
mod decode;

#[cfg(test)]
mod tests;

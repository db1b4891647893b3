pub use self::value::Value;
mod value;

pub use self::variant::Variant;
mod variant;

pub use self::arg::{FromArgs, ValueType};
mod arg;

#[cfg(test)]
mod tests;

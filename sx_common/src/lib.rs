mod cents;

pub mod op;

pub use cents::{Cents, CentsConversionError, DEFAULT_CURRENCY_CODE};

pub mod format;
pub mod naming;
pub mod scalar;
pub mod sqlite_helpers;

pub use naming::{
    make_identifier, quote_identifier, to_snake_case, IdentifierNamer,
    DEFAULT_MAX_IDENTIFIER_LENGTH,
};
pub use scalar::{parse_datetime, ScalarType};

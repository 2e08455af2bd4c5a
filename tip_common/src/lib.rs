mod helpers;
mod satoshis;
mod secret;

pub use helpers::parse_boolean_flag;
pub use satoshis::{Satoshis, SatoshisConversionError};
pub use secret::Secret;

use std::fmt::{self, Debug, Display};

/// Holds credential material (macaroons, passwords) so that it never leaks into logs. Both `Debug` and `Display`
/// print a fixed mask; use [`Secret::reveal`] at the single point where the raw value is actually needed.
#[derive(Clone, Default)]
pub struct Secret<T: Clone + Default>(T);

impl<T: Clone + Default> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn reveal(&self) -> &T {
        &self.0
    }
}

impl<T: Clone + Default> From<T> for Secret<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: Clone + Default> Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl<T: Clone + Default> Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn secrets_are_masked() {
        let macaroon = Secret::from("0201036c6e64".to_string());
        assert_eq!(format!("{macaroon}"), "****");
        assert_eq!(format!("{macaroon:?}"), "Secret(****)");
        assert_eq!(macaroon.reveal(), "0201036c6e64");
    }
}

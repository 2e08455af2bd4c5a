/// Parse a boolean flag from a string value, or return the given default value otherwise.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    match value {
        None => default,
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flags() {
        assert!(parse_boolean_flag(Some(" Yes ".into()), false));
        assert!(parse_boolean_flag(Some("1".into()), false));
        assert!(!parse_boolean_flag(Some("off".into()), true));
        assert!(!parse_boolean_flag(Some("FALSE".into()), true));
        assert!(parse_boolean_flag(None, true));
        assert!(!parse_boolean_flag(Some("maybe".into()), false));
        assert!(parse_boolean_flag(Some("".into()), true));
    }
}

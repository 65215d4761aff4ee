//! Shared `Result` alias.
//!
//! Crates define their own error enums and return them wrapped in a
//! rootcause [`Report`]; callers layer their own context with `.context()`.

use rootcause::Report;

/// `Result` whose error is a [`Report`] with context `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Missing;

    impl fmt::Display for Missing {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "missing")
        }
    }

    impl std::error::Error for Missing {}

    fn lookup(present: bool) -> Result<u8, Missing> {
        if present { Ok(7) } else { Err(Missing.into()) }
    }

    #[test]
    fn domain_errors_convert_into_reports() {
        assert_eq!(lookup(true).expect("present"), 7);
        let err = lookup(false).expect_err("absent");
        assert!(err.to_string().contains("missing"));
    }
}

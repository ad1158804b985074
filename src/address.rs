//! UK address validation and normalisation for report submissions.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::AddressError;

const MIN_ADDRESS_LEN: usize = 10;

static POSTCODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([A-Z]{1,2}[0-9][A-Z0-9]?) ?([0-9][A-Z]{2})\b")
        .expect("postcode pattern is valid")
});

/// An address accepted for processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedAddress {
    /// Whitespace-collapsed address with the postcode in canonical form.
    pub formatted: String,
    /// Canonical postcode, e.g. `SW1A 2AA`.
    pub postcode: String,
}

/// Check that `raw` looks like a complete UK address and normalise it.
pub fn validate(raw: &str) -> Result<ValidatedAddress, AddressError> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Err(AddressError::Empty);
    }
    if collapsed.chars().count() < MIN_ADDRESS_LEN {
        return Err(AddressError::TooShort);
    }

    // Take the last match; house names occasionally contain postcode-like tokens.
    let caps = POSTCODE
        .captures_iter(&collapsed)
        .last()
        .ok_or(AddressError::MissingPostcode)?;
    let whole = caps.get(0).ok_or(AddressError::MissingPostcode)?;
    let postcode = format!(
        "{} {}",
        caps[1].to_ascii_uppercase(),
        caps[2].to_ascii_uppercase()
    );

    let mut formatted = String::with_capacity(collapsed.len() + 1);
    formatted.push_str(&collapsed[..whole.start()]);
    formatted.push_str(&postcode);
    formatted.push_str(&collapsed[whole.end()..]);

    Ok(ValidatedAddress {
        formatted,
        postcode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_downing_street() {
        let addr = validate("10 Downing Street, London, SW1A 2AA").unwrap();
        assert_eq!(addr.postcode, "SW1A 2AA");
        assert_eq!(addr.formatted, "10 Downing Street, London, SW1A 2AA");
    }

    #[test]
    fn normalises_whitespace_and_postcode_case() {
        let addr = validate("  221B   Baker Street,\n London  nw16xe ").unwrap();
        assert_eq!(addr.postcode, "NW1 6XE");
        assert_eq!(addr.formatted, "221B Baker Street, London NW1 6XE");
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(validate("   ").unwrap_err(), AddressError::Empty);
    }

    #[test]
    fn rejects_short_input() {
        assert_eq!(validate("SW1A 2AA").unwrap_err(), AddressError::TooShort);
    }

    #[test]
    fn rejects_address_without_postcode() {
        assert_eq!(
            validate("10 Downing Street, London").unwrap_err(),
            AddressError::MissingPostcode
        );
    }

    #[test]
    fn accepts_single_letter_area_codes() {
        let addr = validate("1 Example Road, Manchester M1 1AE").unwrap();
        assert_eq!(addr.postcode, "M1 1AE");
    }
}

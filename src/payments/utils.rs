//! Stateless payment helpers
//!
//! Pure functions shared by all providers: display formatting, South
//! African ID/phone validation, HMAC hashing, log redaction and the single
//! major-to-minor-unit conversion boundary.

use hmac::{Hmac, Mac};
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use sha2::{Sha256, Sha512};
use std::sync::OnceLock;

use crate::payments::types::Currency;

/// Marker substituted for redacted values in logs
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Key substrings whose values are never logged
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &["cardnumber", "cvv", "pin", "password", "secret", "key"];

/// Format an amount for display, en-ZA style: symbol, space-separated
/// thousands, two decimals. Display only, never used in calculation.
pub fn format_amount(amount: Decimal, currency: Currency) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let text = format!("{:.2}", rounded);
    let (whole, frac) = text.split_once('.').unwrap_or((text.as_str(), "00"));
    let (sign, digits) = match whole.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", whole),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }

    format!("{}{} {}.{}", sign, currency.symbol(), grouped, frac)
}

/// Validate a South African ID number with the Luhn checksum.
///
/// Returns false (never errors) for non-numeric or non-13-digit input.
pub fn validate_sa_id_number(id: &str) -> bool {
    if id.len() != 13 || !id.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let mut sum = 0u32;
    for (i, b) in id.bytes().rev().enumerate() {
        let mut digit = (b - b'0') as u32;
        if i % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }
    sum % 10 == 0
}

/// Validate a South African mobile/landline number. Accepts local
/// (`0xxxxxxxxx`) or country-code (`27xxxxxxxxx` / `+27...`) forms;
/// punctuation and spacing are ignored.
pub fn validate_sa_phone_number(phone: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^(0\d{9}|27\d{9})$").expect("phone pattern is valid")
    });

    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    pattern.is_match(&digits)
}

/// HMAC-SHA256 over `data`, hex encoded
pub fn hmac_sha256_hex(data: &[u8], secret: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// HMAC-SHA512 over `data`, hex encoded
pub fn hmac_sha512_hex(data: &[u8], secret: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha512>::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// HMAC-SHA256 returning the raw tag, for signatures transmitted as base64
pub fn hmac_sha256_raw(data: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time byte comparison (XOR fold), for signature checks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Deep-clone a JSON value, redacting any object key that contains a
/// sensitive fragment. The input is never mutated.
pub fn sanitize_for_logging(data: &Value) -> Value {
    match data {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                let lowered = key.to_ascii_lowercase();
                let sensitive = SENSITIVE_KEY_FRAGMENTS
                    .iter()
                    .any(|fragment| lowered.contains(fragment));
                if sensitive {
                    out.insert(key.clone(), Value::String(REDACTION_MARKER.to_string()));
                } else {
                    out.insert(key.clone(), sanitize_for_logging(value));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_for_logging).collect()),
        other => other.clone(),
    }
}

/// Convert a major-unit amount to minor units (cents), rounding half away
/// from zero. The only major-to-minor conversion point in the crate.
pub fn to_minor_units(amount: Decimal) -> i64 {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

/// Convert minor units (cents) back to a major-unit amount.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Generate a display reference: `{PREFIX}_{epochMillis}_{6 base36 chars}`.
///
/// Not cryptographically unique; callers needing exactly-once semantics
/// must pair this with a UUIDv4 idempotency key.
pub fn generate_reference(prefix: &str) -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

    let millis = chrono::Utc::now().timestamp_millis();
    let mut seed = uuid::Uuid::new_v4().as_u128();
    let mut suffix = [0u8; 6];
    for slot in suffix.iter_mut() {
        *slot = ALPHABET[(seed % 36) as usize];
        seed /= 36;
    }

    format!(
        "{}_{}_{}",
        prefix.to_ascii_uppercase(),
        millis,
        std::str::from_utf8(&suffix).expect("base36 suffix is ASCII")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_format_amount_zar() {
        assert_eq!(format_amount(dec!(1234567.891), Currency::Zar), "R 1 234 567.89");
        assert_eq!(format_amount(dec!(500), Currency::Zar), "R 500.00");
        assert_eq!(format_amount(dec!(0.5), Currency::Usd), "$ 0.50");
    }

    #[test]
    fn test_sa_id_checksum_known_vector() {
        // Well-known valid test ID number
        assert!(validate_sa_id_number("8001015009087"));
        // Last digit altered
        assert!(!validate_sa_id_number("8001015009088"));
    }

    #[test]
    fn test_sa_id_rejects_malformed_without_panicking() {
        assert!(!validate_sa_id_number(""));
        assert!(!validate_sa_id_number("123"));
        assert!(!validate_sa_id_number("80010150090871"));
        assert!(!validate_sa_id_number("80010150090a7"));
        assert!(!validate_sa_id_number("8001-01500908"));
    }

    #[test]
    fn test_sa_phone_validation() {
        assert!(validate_sa_phone_number("0821234567"));
        assert!(validate_sa_phone_number("+27 82 123 4567"));
        assert!(validate_sa_phone_number("27821234567"));
        assert!(!validate_sa_phone_number("082123456"));
        assert!(!validate_sa_phone_number("12345"));
        assert!(!validate_sa_phone_number(""));
    }

    #[test]
    fn test_hmac_sha256_hex_is_deterministic() {
        let a = hmac_sha256_hex(b"payload", b"secret");
        let b = hmac_sha256_hex(b"payload", b"secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hmac_sha256_hex(b"payload2", b"secret"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abcdef", b"abcdef"));
        assert!(!constant_time_eq(b"abcdef", b"abcdeg"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn test_sanitize_redacts_nested_keys() {
        let input = json!({
            "cardNumber": "4111111111111111",
            "nested": { "cvv": "123", "note": "keep" },
            "orderId": "abc",
            "apiKey": "k"
        });
        let original = input.clone();

        let sanitized = sanitize_for_logging(&input);
        assert_eq!(sanitized["cardNumber"], REDACTION_MARKER);
        assert_eq!(sanitized["nested"]["cvv"], REDACTION_MARKER);
        assert_eq!(sanitized["nested"]["note"], "keep");
        assert_eq!(sanitized["orderId"], "abc");
        assert_eq!(sanitized["apiKey"], REDACTION_MARKER);
        // Input untouched
        assert_eq!(input, original);
    }

    #[test]
    fn test_minor_unit_rounding() {
        assert_eq!(to_minor_units(dec!(10.00)), 1000);
        assert_eq!(to_minor_units(dec!(10.005)), 1001);
        assert_eq!(to_minor_units(dec!(10.004)), 1000);
        assert_eq!(to_minor_units(dec!(0.1)), 10);
        assert_eq!(from_minor_units(1001), dec!(10.01));
    }

    #[test]
    fn test_generate_reference_shape() {
        let reference = generate_reference("pf");
        let parts: Vec<&str> = reference.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "PF");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2]
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()));
    }
}

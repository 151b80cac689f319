//! Input rules the gateway enforces before any network call: Kenyan MSISDN
//! normalization and whole-unit amount bounds.

use crate::payments::error::{GatewayError, GatewayResult};
use bigdecimal::{BigDecimal, ToPrimitive};
use regex::Regex;
use std::sync::OnceLock;

fn canonical_msisdn() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^254[17]\d{8}$").expect("static regex must compile"))
}

/// Normalize a payer phone number to the canonical `254XXXXXXXXX` form.
///
/// Accepts local (`07...`, `01...`), country-code (`2547...`) and
/// international (`+2547...`) spellings. Separator characters are tolerated.
pub fn normalize_phone(raw: &str) -> GatewayResult<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '(' && *c != ')')
        .collect();

    let candidate = if let Some(rest) = digits.strip_prefix('+') {
        rest.to_string()
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("254{}", rest)
    } else {
        digits
    };

    if canonical_msisdn().is_match(&candidate) {
        Ok(candidate)
    } else {
        Err(GatewayError::Validation {
            message: format!("'{}' is not a valid Kenyan mobile number", raw),
            field: Some("phone_number".to_string()),
        })
    }
}

/// Validate and truncate a contribution amount to whole KES.
///
/// The upstream only accepts whole units, so fractional amounts are truncated
/// before the bounds check; `0.99` is rejected the same way `0` is.
pub fn validate_amount(amount: &BigDecimal, ceiling: u64) -> GatewayResult<u64> {
    if amount < &BigDecimal::from(0) {
        return Err(GatewayError::Validation {
            message: "amount must be greater than zero".to_string(),
            field: Some("amount".to_string()),
        });
    }

    let whole = amount
        .with_scale_round(0, bigdecimal::RoundingMode::Down)
        .to_u64()
        .ok_or_else(|| GatewayError::Validation {
            message: format!("invalid amount: {}", amount),
            field: Some("amount".to_string()),
        })?;

    if whole < 1 {
        return Err(GatewayError::Validation {
            message: "amount must be at least 1 KES".to_string(),
            field: Some("amount".to_string()),
        });
    }
    if whole > ceiling {
        return Err(GatewayError::Validation {
            message: format!("amount exceeds the {} KES per-transaction limit", ceiling),
            field: Some("amount".to_string()),
        });
    }
    Ok(whole)
}

/// Truncate reversal remarks to the upstream field-length limit.
pub fn truncate_remarks(remarks: &str) -> String {
    const MAX_REMARKS_LEN: usize = 100;
    if remarks.len() <= MAX_REMARKS_LEN {
        remarks.to_string()
    } else {
        remarks.chars().take(MAX_REMARKS_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const CEILING: u64 = 300_000;

    #[test]
    fn phone_spellings_normalize_to_same_canonical_form() {
        for raw in ["0712345678", "+254712345678", "254712345678", "0712 345 678"] {
            assert_eq!(
                normalize_phone(raw).expect("should normalize"),
                "254712345678",
                "failed for {}",
                raw
            );
        }
    }

    #[test]
    fn landline_and_foreign_numbers_are_rejected() {
        for raw in ["0202345678", "441234567890", "071234567", "not-a-number", ""] {
            assert!(normalize_phone(raw).is_err(), "accepted {}", raw);
        }
    }

    #[test]
    fn amount_bounds_are_inclusive() {
        assert_eq!(
            validate_amount(&BigDecimal::from(1), CEILING).expect("1 is valid"),
            1
        );
        assert_eq!(
            validate_amount(&BigDecimal::from(300_000), CEILING).expect("ceiling is valid"),
            300_000
        );
        assert!(validate_amount(&BigDecimal::from(0), CEILING).is_err());
        assert!(validate_amount(&BigDecimal::from(-5), CEILING).is_err());
        assert!(validate_amount(&BigDecimal::from(300_001), CEILING).is_err());
    }

    #[test]
    fn fractional_amounts_truncate_before_bounds_check() {
        let just_under_one = BigDecimal::from_str("0.99").expect("valid decimal");
        assert!(validate_amount(&just_under_one, CEILING).is_err());

        let fractional = BigDecimal::from_str("250.75").expect("valid decimal");
        assert_eq!(
            validate_amount(&fractional, CEILING).expect("should truncate"),
            250
        );
    }

    #[test]
    fn remarks_are_truncated_to_upstream_limit() {
        let long = "x".repeat(250);
        assert_eq!(truncate_remarks(&long).len(), 100);
        assert_eq!(truncate_remarks("refund"), "refund");
    }
}

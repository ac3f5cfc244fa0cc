use crate::errors::FlowError;
use crate::service::subject_service::{SubjectId, digits_only};
use serde::{Deserialize, Serialize};

const COUNTRY_CODE: &str = "55";

/// Area code assumed when the number has none. Also the prefix of the fallback
/// phone (`DEFAULT_DDD` + subject id) used when the partner rejects a real number.
pub const DEFAULT_DDD: &str = "11";

const FALLBACK_LEN: usize = 13;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneParts {
    pub ddd: String,
    pub numero: String,
}

/// Canonicalizes a free-form phone into the partner's 11-digit mobile shape
/// (DDD + 9-digit number starting with 9). The 13-digit fallback encoding is
/// passed through untouched.
pub fn normalize_phone(raw: &str) -> Result<String, FlowError> {
    let mut digits = digits_only(raw);

    if digits.starts_with(COUNTRY_CODE) && digits.len() >= 12 {
        digits = digits[COUNTRY_CODE.len()..].to_string();
    }

    if is_fallback_phone(&digits) {
        return Ok(digits);
    }

    match digits.len() {
        11 => {
            let (ddd, number) = digits.split_at(2);
            if number.starts_with('9') {
                Ok(digits)
            } else {
                Ok(format!("{ddd}9{}", &number[1..]))
            }
        }
        10 => {
            let (ddd, number) = digits.split_at(2);
            Ok(format!("{ddd}9{number}"))
        }
        9 => {
            if digits.starts_with('9') {
                Ok(format!("{DEFAULT_DDD}{digits}"))
            } else {
                Ok(format!("{DEFAULT_DDD}9{}", &digits[1..]))
            }
        }
        8 => Ok(format!("{DEFAULT_DDD}9{digits}")),
        length => Err(FlowError::InvalidPhoneFormat { length }),
    }
}

pub fn fallback_phone(subject: &SubjectId) -> String {
    format!("{DEFAULT_DDD}{subject}")
}

pub fn is_fallback_phone(digits: &str) -> bool {
    digits.len() == FALLBACK_LEN && digits.starts_with(DEFAULT_DDD)
}

/// Splits a normalized phone into the `{ddd, numero}` object the partner's
/// simulation endpoints expect.
pub fn split_phone(normalized: &str) -> PhoneParts {
    let split = normalized.len().min(2);
    let (ddd, numero) = normalized.split_at(split);
    PhoneParts {
        ddd: ddd.to_string(),
        numero: numero.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_mobile_is_idempotent() {
        let once = normalize_phone("(11) 98765-4321").expect("valid");
        assert_eq!(once, "11987654321");
        assert_eq!(normalize_phone(&once).expect("valid"), once);
    }

    #[test]
    fn eleven_digits_without_leading_nine_get_one() {
        assert_eq!(normalize_phone("11387654321").expect("valid"), "11987654321");
    }

    #[test]
    fn strips_country_code_first() {
        assert_eq!(normalize_phone("556198765432").expect("valid"), "61998765432");
        assert_eq!(
            normalize_phone("+55 61 99876-5432").expect("valid"),
            "61998765432"
        );
    }

    #[test]
    fn landline_gets_mobile_prefix() {
        assert_eq!(normalize_phone("6133224455").expect("valid"), "61933224455");
    }

    #[test]
    fn nine_digits_assume_default_ddd() {
        assert_eq!(normalize_phone("987654321").expect("valid"), "11987654321");
        assert_eq!(normalize_phone("387654321").expect("valid"), "11987654321");
    }

    #[test]
    fn eight_digits_become_eleven_with_default_ddd() {
        let phone = normalize_phone("3322-4455").expect("valid");
        assert_eq!(phone.len(), 11);
        assert!(phone.starts_with("119"));
        assert_eq!(phone, "11933224455");
    }

    #[test]
    fn fallback_sentinel_passes_through() {
        let subject = SubjectId::parse("16183805831").expect("valid id");
        let fallback = fallback_phone(&subject);
        assert_eq!(fallback, "1116183805831");
        assert_eq!(normalize_phone(&fallback).expect("valid"), fallback);
    }

    #[test]
    fn other_lengths_fail() {
        assert!(matches!(
            normalize_phone("1234567"),
            Err(FlowError::InvalidPhoneFormat { length: 7 })
        ));
        assert!(matches!(
            normalize_phone(""),
            Err(FlowError::InvalidPhoneFormat { length: 0 })
        ));
        assert!(matches!(
            normalize_phone("21234567890123"),
            Err(FlowError::InvalidPhoneFormat { length: 14 })
        ));
    }

    #[test]
    fn split_phone_separates_ddd() {
        let parts = split_phone("11987654321");
        assert_eq!(parts.ddd, "11");
        assert_eq!(parts.numero, "987654321");
    }
}

use super::response_shape_service::first_string;
use super::subject_service::digits_only;
use crate::errors::FlowError;
use crate::module::flow::model::EmploymentLink;
use serde_json::Value;

pub const EMPLOYER_ID_LEN: usize = 14;
pub const REGISTRATION_PLACEHOLDER: &str = "0001";

const REGISTRATION_KEYS: &[&str] = &["matricula", "registroEmpregaticio", "numeroMatricula"];
const EMPLOYER_ID_KEYS: &[&str] = &["cnpj", "cnpjEmpregador", "numeroInscricaoEmpregador"];
const MAX_REGISTRATION_LEN: usize = 20;
const TRUNCATED_REGISTRATION_LEN: usize = 10;

/// Left-pads with zeros or keeps the trailing 14 digits.
pub fn normalize_employer_id(raw: &str) -> String {
    let digits = digits_only(raw);
    if digits.len() >= EMPLOYER_ID_LEN {
        digits[digits.len() - EMPLOYER_ID_LEN..].to_string()
    } else {
        format!("{digits:0>width$}", width = EMPLOYER_ID_LEN)
    }
}

/// Digits only, employer id prefix removed, placeholder when nothing is left,
/// trailing 10 digits when implausibly long.
pub fn clean_registration(raw: &str, employer_id: &str) -> String {
    let mut registration = digits_only(raw);
    let employer_digits = digits_only(employer_id);
    if !employer_digits.is_empty() {
        if let Some(rest) = registration.strip_prefix(&employer_digits) {
            registration = rest.to_string();
        }
    }
    if registration.is_empty() {
        return REGISTRATION_PLACEHOLDER.to_string();
    }
    if registration.len() > MAX_REGISTRATION_LEN {
        return registration[registration.len() - TRUNCATED_REGISTRATION_LEN..].to_string();
    }
    registration
}

/// Both fields must be present on the link. Only a registration that cleans
/// down to nothing falls back to the placeholder.
pub fn normalize_link(link: &Value) -> Result<EmploymentLink, FlowError> {
    let raw_employer = first_string(link, EMPLOYER_ID_KEYS).ok_or_else(|| {
        FlowError::InvalidInput("employment link carries no employer id".to_string())
    })?;
    let employer_id = normalize_employer_id(&raw_employer);
    let raw_registration = first_string(link, REGISTRATION_KEYS).ok_or_else(|| {
        FlowError::InvalidInput("employment link carries no registration".to_string())
    })?;
    let registration = clean_registration(&raw_registration, &employer_id);
    Ok(EmploymentLink {
        employer_id,
        registration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pads_short_employer_id() {
        assert_eq!(normalize_employer_id("123456780001"), "00123456780001");
        assert_eq!(normalize_employer_id("12.345.678/0001-99"), "12345678000199");
    }

    #[test]
    fn truncates_long_employer_id_to_trailing_digits() {
        assert_eq!(normalize_employer_id("9912345678000199"), "12345678000199");
    }

    #[test]
    fn strips_employer_prefix_from_registration() {
        let employer = "12345678000199";
        assert_eq!(clean_registration(&format!("{employer}123"), employer), "123");
    }

    #[test]
    fn empty_registration_becomes_placeholder() {
        assert_eq!(clean_registration("", "12345678000199"), "0001");
        assert_eq!(clean_registration("--", "12345678000199"), "0001");
        assert_eq!(clean_registration("12345678000199", "12345678000199"), "0001");
    }

    #[test]
    fn long_registration_keeps_last_ten_digits() {
        let raw = "123456789012345678901234";
        assert_eq!(clean_registration(raw, "00000000000000"), "5678901234");
    }

    #[test]
    fn normalizes_link_aliases() {
        let link = normalize_link(&json!({"matricula": "98765", "cnpj": "12345678000199"}))
            .expect("link");
        assert_eq!(link.registration, "98765");
        assert_eq!(link.employer_id, "12345678000199");

        let link = normalize_link(&json!({
            "numeroMatricula": 4321,
            "numeroInscricaoEmpregador": "345678000199"
        }))
        .expect("link");
        assert_eq!(link.registration, "4321");
        assert_eq!(link.employer_id, "00345678000199");
    }

    #[test]
    fn link_missing_a_field_is_rejected() {
        assert!(matches!(
            normalize_link(&json!({"matricula": "1"})),
            Err(FlowError::InvalidInput(_))
        ));
        assert!(matches!(
            normalize_link(&json!({"cnpj": "12345678000199"})),
            Err(FlowError::InvalidInput(_))
        ));
    }

    #[test]
    fn registration_that_cleans_to_nothing_gets_placeholder() {
        let link = normalize_link(&json!({"matricula": "12345678000199", "cnpj": "12345678000199"}))
            .expect("link");
        assert_eq!(link.registration, REGISTRATION_PLACEHOLDER);
    }
}

use crate::error::{AppError, AppResult};

/// Three letters, a digit, a letter or digit, two digits. Covers both the
/// old (`ABC1234`) and Mercosul (`ABC1D23`) layouts.
pub fn validate_plate(plate: &str) -> bool {
    let chars: Vec<char> = plate.chars().collect();
    if chars.len() != 7 {
        return false;
    }

    chars[..3].iter().all(|c| c.is_ascii_uppercase())
        && chars[3].is_ascii_digit()
        && (chars[4].is_ascii_uppercase() || chars[4].is_ascii_digit())
        && chars[5..].iter().all(|c| c.is_ascii_digit())
}

/// Upper-cases and validates a plate taken from user input.
pub fn normalize_plate(plate: &str) -> AppResult<String> {
    let plate = plate.trim().to_uppercase();
    if !validate_plate(&plate) {
        return Err(AppError::BadRequest("Invalid plate format".to_string()));
    }
    Ok(plate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_both_layouts() {
        assert!(validate_plate("ABC1234"));
        assert!(validate_plate("ABC1D23"));
    }

    #[test]
    fn rejects_malformed_plates() {
        assert!(!validate_plate("AB12345"));
        assert!(!validate_plate("ABCD123"));
        assert!(!validate_plate("ABC1D2"));
        assert!(!validate_plate("ABC1D2X"));
        assert!(!validate_plate("abc1d23"));
    }

    #[test]
    fn normalizes_case_before_validating() {
        assert_eq!(normalize_plate(" abc1d23 ").unwrap(), "ABC1D23");
        assert!(matches!(normalize_plate("nope"), Err(AppError::BadRequest(_))));
    }
}

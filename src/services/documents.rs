use crate::error::{AppError, AppResult};

fn digits_of(raw: &str) -> Vec<u32> {
    raw.chars().filter_map(|c| c.to_digit(10)).collect()
}

/// Mod-11 check digit shared by CPF and CNPJ.
fn check_digit(digits: &[u32], weights: impl Iterator<Item = u32>) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    match sum % 11 {
        0 | 1 => 0,
        rest => 11 - rest,
    }
}

fn all_same(digits: &[u32]) -> bool {
    digits.windows(2).all(|pair| pair[0] == pair[1])
}

fn render(digits: &[u32]) -> String {
    digits.iter().filter_map(|d| char::from_digit(*d, 10)).collect()
}

pub fn validate_cpf(raw: &str) -> bool {
    let digits = digits_of(raw);
    if digits.len() != 11 || all_same(&digits) {
        return false;
    }

    let first = check_digit(&digits[..9], (2..=10).rev());
    let second = check_digit(&digits[..10], (2..=11).rev());
    digits[9] == first && digits[10] == second
}

pub fn validate_cnpj(raw: &str) -> bool {
    let digits = digits_of(raw);
    if digits.len() != 14 || all_same(&digits) {
        return false;
    }

    let weights = |n: usize| (0..n).rev().map(|i| (i as u32 % 8) + 2).collect::<Vec<_>>();
    let first = check_digit(&digits[..12], weights(12).into_iter());
    let second = check_digit(&digits[..13], weights(13).into_iter());
    digits[12] == first && digits[13] == second
}

/// Strips punctuation from a CPF and validates its check digits.
pub fn normalize_cpf(raw: &str) -> AppResult<String> {
    if !validate_cpf(raw) {
        return Err(AppError::BadRequest(format!("Invalid CPF format: {}", raw)));
    }
    Ok(render(&digits_of(raw)))
}

/// Strips punctuation from a CNPJ and validates its check digits.
pub fn normalize_cnpj(raw: &str) -> AppResult<String> {
    if !validate_cnpj(raw) {
        return Err(AppError::BadRequest(format!("Invalid CNPJ format: {}", raw)));
    }
    Ok(render(&digits_of(raw)))
}

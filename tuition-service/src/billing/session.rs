//! Period-code parsing and graduate session arithmetic.

use service_core::error::AppError;

/// Year and semester decoded from a `YYYYS` period code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PeriodCode {
    pub year: i32,
    pub semester: i32,
}

impl PeriodCode {
    pub fn parse(code: &str) -> Result<Self, AppError> {
        if code.len() != 5 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invalid period code '{}': expected five digits such as 20241",
                code
            )));
        }

        let year = code[..4].parse::<i32>().map_err(|e| {
            AppError::BadRequest(anyhow::anyhow!("Invalid year in period code '{}': {}", code, e))
        })?;
        let semester = code[4..].parse::<i32>().map_err(|e| {
            AppError::BadRequest(anyhow::anyhow!(
                "Invalid semester in period code '{}': {}",
                code,
                e
            ))
        })?;

        Ok(Self { year, semester })
    }
}

/// One-based session number of `current` for a student admitted in `admission`.
pub fn session_number(admission: &str, current: &str) -> Result<i32, AppError> {
    let admission = PeriodCode::parse(admission)?;
    let current = PeriodCode::parse(current)?;

    Ok((current.year - admission.year) * 2 + current.semester - admission.semester + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_sessions_across_years() {
        assert_eq!(session_number("20231", "20252").unwrap(), 6);
        assert_eq!(session_number("20231", "20231").unwrap(), 1);
        assert_eq!(session_number("20232", "20241").unwrap(), 2);
    }

    #[test]
    fn rejects_codes_that_are_not_five_digits() {
        for bad in ["2023", "202311", "2023A", ""] {
            let err = session_number(bad, "20251").unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{} accepted", bad);
        }
        assert!(session_number("20231", "2025-").is_err());
    }
}

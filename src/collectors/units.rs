use crate::error::ParseError;

pub const KIB: i64 = 1024;
pub const MIB: i64 = 1024 * KIB;
pub const GIB: i64 = 1024 * MIB;
pub const TIB: i64 = 1024 * GIB;
pub const PIB: i64 = 1024 * TIB;

fn unit_factor(unit: &str) -> Option<i64> {
    match unit {
        "B" => Some(1),
        "KiB" => Some(KIB),
        "MiB" => Some(MIB),
        "GiB" => Some(GIB),
        "TiB" => Some(TIB),
        "PiB" => Some(PIB),
        _ => None,
    }
}

/// Parses a binary byte size such as `"512 MiB"` into bytes.
///
/// The input is trimmed once and split on the first space; the left side is a
/// non-negative float, the right side one of `B`, `KiB`, `MiB`, `GiB`, `TiB`,
/// `PiB`. Fractional results are truncated toward zero; results that do not
/// fit in an `i64` are rejected.
pub fn parse_byte_size(text: &str) -> Result<i64, ParseError> {
    let trimmed = text.trim();
    let (number, unit) = trimmed
        .split_once(' ')
        .ok_or_else(|| ParseError::MalformedSize(text.to_string()))?;

    let amount: f64 = number.parse().map_err(|_| ParseError::InvalidNumber {
        input: text.to_string(),
        value: number.to_string(),
    })?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(ParseError::InvalidNumber {
            input: text.to_string(),
            value: number.to_string(),
        });
    }

    let factor = unit_factor(unit).ok_or_else(|| ParseError::UnknownUnit {
        input: text.to_string(),
        unit: unit.to_string(),
    })?;

    let bytes = amount * factor as f64;
    if bytes >= i64::MAX as f64 {
        return Err(ParseError::InvalidNumber {
            input: text.to_string(),
            value: number.to_string(),
        });
    }
    Ok(bytes as i64)
}

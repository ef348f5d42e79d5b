//! Duration strings such as `5m`, `1h30m` or `-1.5h`

use chrono::TimeDelta;

// Fraction digits beyond this do not change the result at nanosecond precision
const MAX_FRACTION_DIGITS: usize = 18;

/// Parse a signed sequence of decimal numbers, each with a unit suffix.
///
/// Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `0` is
/// accepted without a unit. Returns `None` for anything else.
pub fn parse_duration(input: &str) -> Option<TimeDelta> {
    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Some(TimeDelta::zero());
    }
    if rest.is_empty() {
        return None;
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let scale = unit_nanos(unit)?;
        total = total.checked_add(scaled(number, scale)?)?;
        rest = tail;
    }

    let nanos = i64::try_from(total).ok()?;
    Some(TimeDelta::nanoseconds(if negative { -nanos } else { nanos }))
}

fn unit_nanos(unit: &str) -> Option<u128> {
    let nanos = match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        _ => return None,
    };
    Some(nanos)
}

fn scaled(number: &str, scale: u128) -> Option<u128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }

    let whole_value: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };

    let mut numerator: u128 = 0;
    let mut divisor: u128 = 1;
    for (i, digit) in fraction.bytes().enumerate() {
        if !digit.is_ascii_digit() {
            return None;
        }
        if i < MAX_FRACTION_DIGITS {
            numerator = numerator * 10 + u128::from(digit - b'0');
            divisor *= 10;
        }
    }

    whole_value
        .checked_mul(scale)?
        .checked_add(numerator * scale / divisor)
}

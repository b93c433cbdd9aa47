// SPDX-License-Identifier: MIT OR Apache-2.0

//! ES6 / RFC 8785 number formatting.
//!
//! The serializer in ECMAScript `Number::toString(10)` terms: shortest
//! digit string that round-trips, plain decimal notation for exponents in
//! `(-7, 21]`, scientific notation with an explicit sign outside that
//! window.

use crate::CanonError;

/// Format a finite `f64` the way ES6 `Number::toString` does.
///
/// `-0` collapses to `"0"`, integral values drop the fraction
/// (`3.0` → `"3"`), and magnitudes at or above `1e21` or below `1e-6`
/// switch to exponent notation (`1e+21`, `1e-7`).
///
/// # Errors
///
/// Returns [`CanonError::NonFinite`] for NaN and infinities.
pub fn format_f64(f: f64) -> Result<String, CanonError> {
    if !f.is_finite() {
        return Err(CanonError::NonFinite);
    }
    if f == 0.0 {
        return Ok("0".to_string());
    }
    if f < 0.0 {
        return Ok(format!("-{}", format_positive(-f)));
    }
    Ok(format_positive(f))
}

fn format_positive(f: f64) -> String {
    // `{:e}` yields the shortest mantissa that round-trips, e.g.
    // "1.2345e3" or "5e-2". Split it into digits and a base-10 exponent.
    let sci = format!("{f:e}");
    let (mantissa, exp) = sci
        .split_once('e')
        .expect("LowerExp always contains an exponent");
    let exp: i32 = exp.parse().expect("LowerExp exponent is an integer");
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    // Position of the decimal point relative to the digit string.
    let n = i64::from(exp) + 1;
    let k = digits.len() as i64;

    if n >= k && n <= 21 {
        // All digits left of the point, pad with zeros: 123000
        let mut out = digits;
        out.extend(std::iter::repeat_n('0', (n - k) as usize));
        out
    } else if n > 0 && n <= 21 {
        // Point falls inside the digit string: 12.345
        let (head, tail) = digits.split_at(n as usize);
        format!("{head}.{tail}")
    } else if n > -6 && n <= 0 {
        // Leading zeros: 0.00012345
        let zeros: String = std::iter::repeat_n('0', (-n) as usize).collect();
        format!("0.{zeros}{digits}")
    } else {
        // Scientific notation with an explicit exponent sign.
        let exponent = n - 1;
        let sign = if exponent < 0 { '-' } else { '+' };
        if digits.len() == 1 {
            format!("{digits}e{sign}{}", exponent.abs())
        } else {
            let (head, tail) = digits.split_at(1);
            format!("{head}.{tail}e{sign}{}", exponent.abs())
        }
    }
}

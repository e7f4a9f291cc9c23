//! Printf-subset formatter (C2 support, §4.4 type-spec wrapping).
//!
//! Implements the conversion specifiers the lexer's `type_spec_len` accepts:
//! `d i o u x X e E f F g G c r s`, plus `#0+ -` flags and width/precision.
//! `q`/`m` are handled separately as `Expr::Escape`, not here.

use crate::error::{RenderError, ValueError};
use crate::Value;

struct Spec {
    flag_minus: bool,
    flag_zero: bool,
    flag_plus: bool,
    flag_space: bool,
    flag_alt: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conv: char,
}

fn parse_spec(spec: &str) -> Spec {
    let mut chars = spec.chars().peekable();
    let mut flag_minus = false;
    let mut flag_zero = false;
    let mut flag_plus = false;
    let mut flag_space = false;
    let mut flag_alt = false;
    while let Some(&c) = chars.peek() {
        match c {
            '-' => flag_minus = true,
            '0' => flag_zero = true,
            '+' => flag_plus = true,
            ' ' => flag_space = true,
            '#' => flag_alt = true,
            _ => break,
        }
        chars.next();
    }
    let mut width_str = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            width_str.push(c);
            chars.next();
        } else {
            break;
        }
    }
    let mut precision = None;
    if chars.peek() == Some(&'.') {
        chars.next();
        let mut precision_str = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                precision_str.push(c);
                chars.next();
            } else {
                break;
            }
        }
        precision = Some(precision_str.parse().unwrap_or(0));
    }
    let conv = chars.next().unwrap_or('s');
    Spec {
        flag_minus,
        flag_zero,
        flag_plus,
        flag_space,
        flag_alt,
        width: width_str.parse().ok(),
        precision,
        conv,
    }
}

/// Apply a printf-style conversion specifier to `value`, per §4.4's
/// fallback case: `("%" + spec) % value`.
pub fn printf(spec: &str, value: &Value) -> Result<String, RenderError> {
    let spec = parse_spec(spec);
    let body = match spec.conv {
        'd' | 'i' | 'u' => {
            let i = as_int(value)?;
            signed(i, spec.flag_plus, spec.flag_space)
        }
        'o' => {
            let i = as_int(value)?;
            let s = format!("{:o}", i);
            if spec.flag_alt { format!("0{s}") } else { s }
        }
        'x' => {
            let i = as_int(value)?;
            let s = format!("{:x}", i);
            if spec.flag_alt { format!("0x{s}") } else { s }
        }
        'X' => {
            let i = as_int(value)?;
            let s = format!("{:X}", i);
            if spec.flag_alt { format!("0X{s}") } else { s }
        }
        'e' | 'E' => {
            let f = as_float(value)?;
            let precision = spec.precision.unwrap_or(6);
            let s = format!("{f:.precision$e}");
            if spec.conv == 'E' { s.to_uppercase() } else { s }
        }
        'f' | 'F' => {
            let f = as_float(value)?;
            let precision = spec.precision.unwrap_or(6);
            signed_str(format!("{f:.precision$}"), f >= 0.0, spec.flag_plus, spec.flag_space)
        }
        'g' | 'G' => {
            let f = as_float(value)?;
            let s = format!("{f}");
            if spec.conv == 'G' { s.to_uppercase() } else { s }
        }
        'c' => value.as_str().map(str::to_owned).unwrap_or_else(|| value.to_string()),
        'r' | 's' => value.to_string(),
        other => {
            return Err(RenderError::Other(format!("unsupported conversion specifier `{other}`")))
        }
    };
    let body = if let Some(precision) = spec.precision {
        if matches!(spec.conv, 's' | 'r') {
            body.chars().take(precision).collect()
        } else {
            body
        }
    } else {
        body
    };
    Ok(pad(body, spec.width, spec.flag_minus, spec.flag_zero))
}

fn as_int(value: &Value) -> Result<i64, RenderError> {
    match value {
        Value::Integer(i) => Ok(*i),
        Value::Float(f) => Ok(*f as i64),
        Value::Boolean(b) => Ok(i64::from(*b)),
        other => Err(ValueError::Type { expected: "number", actual: other.clone() }.into()),
    }
}

fn as_float(value: &Value) -> Result<f64, RenderError> {
    value
        .as_f64()
        .ok_or_else(|| ValueError::Type { expected: "number", actual: value.clone() }.into())
}

fn signed(i: i64, flag_plus: bool, flag_space: bool) -> String {
    signed_str(i.abs().to_string(), i >= 0, flag_plus, flag_space)
}

fn signed_str(magnitude: String, non_negative: bool, flag_plus: bool, flag_space: bool) -> String {
    if non_negative {
        if flag_plus {
            format!("+{magnitude}")
        } else if flag_space {
            format!(" {magnitude}")
        } else {
            magnitude
        }
    } else if !magnitude.starts_with('-') {
        format!("-{magnitude}")
    } else {
        magnitude
    }
}

fn pad(body: String, width: Option<usize>, flag_minus: bool, flag_zero: bool) -> String {
    let Some(width) = width else { return body };
    if body.chars().count() >= width {
        return body;
    }
    let fill_count = width - body.chars().count();
    if flag_minus {
        format!("{body}{}", " ".repeat(fill_count))
    } else if flag_zero {
        let (sign, rest) = match body.strip_prefix(['-', '+']) {
            Some(rest) => (&body[..1], rest),
            None => ("", body.as_str()),
        };
        format!("{sign}{}{rest}", "0".repeat(fill_count))
    } else {
        format!("{}{body}", " ".repeat(fill_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::proptest;
    use rstest::rstest;

    #[rstest]
    #[case::int("d", Value::Integer(42), "42")]
    #[case::padded_int("05d", Value::Integer(42), "00042")]
    #[case::precision_float(".2f", Value::Float(3.14165), "3.14")]
    #[case::string("s", Value::String("hi".into()), "hi")]
    #[case::hex("x", Value::Integer(255), "ff")]
    #[case::plus_sign("+d", Value::Integer(5), "+5")]
    fn test_printf(#[case] spec: &str, #[case] value: Value, #[case] expected: &str) {
        assert_eq!(printf(spec, &value).unwrap(), expected);
    }

    proptest! {
        /// `%d` on an integer matches the host's own decimal formatting,
        /// for every value the host can represent.
        #[test]
        fn test_d_matches_host_decimal(n: i64) {
            assert_eq!(printf("d", &Value::Integer(n)).unwrap(), n.to_string());
        }

        /// `%s` on a string is the identity transform, width/precision aside.
        #[test]
        fn test_s_is_identity_for_strings(s: String) {
            assert_eq!(printf("s", &Value::String(s.clone())).unwrap(), s);
        }
    }
}

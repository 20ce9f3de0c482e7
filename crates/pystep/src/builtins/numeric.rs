//! Numeric builtins: `abs`, `round`, `pow`, `chr`, `ord`, `hex`, `bin`, `oct` and `hash`.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::{
    builtins::{Builtin, check_arg_count},
    exception::{ExcType, RunResult},
    expressions::Operator,
    io::PrintWriter,
    run::Interp,
    tracer::Tracer,
    value::Value,
};

impl<T: Tracer, P: PrintWriter> Interp<'_, T, P> {
    pub(super) fn builtin_abs(&mut self, value: &Value) -> RunResult<Value> {
        match value {
            Value::Bool(_) | Value::Int(_) => {
                let i = value.as_i64().unwrap_or_default();
                Ok(i.checked_abs().map_or_else(|| Value::from_bigint(BigInt::from(i).abs()), Value::Int))
            }
            Value::LongInt(i) => Ok(Value::from_bigint(i.abs())),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            Value::Instance(instance) => match self.call_dunder(instance, "__abs__", Vec::new())? {
                Some(result) => Ok(result),
                None => abs_type_error(value),
            },
            other => abs_type_error(other),
        }
    }

    /// `round(number[, ndigits])` with banker's rounding, as CPython does.
    pub(super) fn builtin_round(&mut self, args: Vec<Value>, ndigits: Option<Value>) -> RunResult<Value> {
        check_arg_count("round", &args, 1, 2)?;
        let mut args = args.into_iter();
        let number = args.next().unwrap_or(Value::None);
        let ndigits = match ndigits.or_else(|| args.next()) {
            None | Some(Value::None) => None,
            Some(value) => Some(value.as_i64().ok_or_else(|| {
                ExcType::TypeError.raise(format!(
                    "'{}' object cannot be interpreted as an integer",
                    value.type_name()
                ))
            })?),
        };
        match (&number, ndigits) {
            (Value::Bool(_) | Value::Int(_) | Value::LongInt(_), None) => Ok(Value::from_bigint(number.as_bigint().unwrap_or_default())),
            (Value::Bool(_) | Value::Int(_) | Value::LongInt(_), Some(digits)) => {
                if digits >= 0 {
                    return Ok(Value::from_bigint(number.as_bigint().unwrap_or_default()));
                }
                round_int(&number.as_bigint().unwrap_or_default(), digits)
            }
            (Value::Float(f), None) => {
                let rounded = f.round_ties_even();
                Ok(Value::from_bigint(crate::ops::float_to_bigint(rounded)?))
            }
            (Value::Float(f), Some(digits)) => Ok(Value::Float(round_float(*f, digits))),
            (Value::Instance(instance), _) => {
                let args = ndigits.map(Value::Int).into_iter().collect();
                match self.call_dunder(instance, "__round__", args)? {
                    Some(result) => Ok(result),
                    None => round_type_error(&number),
                }
            }
            (other, _) => round_type_error(other),
        }
    }

    pub(super) fn builtin_pow(&mut self, args: Vec<Value>, modulus: Option<Value>) -> RunResult<Value> {
        check_arg_count("pow", &args, 2, 3)?;
        let mut args = args.into_iter();
        let base = args.next().unwrap_or(Value::None);
        let exponent = args.next().unwrap_or(Value::None);
        match modulus.or_else(|| args.next()) {
            None | Some(Value::None) => self.binary_op(&base, Operator::Pow, &exponent),
            Some(modulus) => {
                let (Some(b), Some(e), Some(m)) = (base.as_bigint(), exponent.as_bigint(), modulus.as_bigint()) else {
                    return ExcType::TypeError
                        .err("pow() 3rd argument not allowed unless all arguments are integers");
                };
                if m.is_zero() {
                    return ExcType::ValueError.err("pow() 3rd argument cannot be 0");
                }
                if e.is_negative() {
                    return ExcType::ValueError.err("base is not invertible for the given modulus");
                }
                // modpow rounds like mod_floor, so the result takes the sign of the modulus.
                Ok(Value::from_bigint(b.modpow(&e, &m)))
            }
        }
    }

    pub(super) fn builtin_hash(&mut self, value: &Value) -> RunResult<Value> {
        if let Value::Instance(instance) = value {
            if let Some(result) = self.call_dunder(instance, "__hash__", Vec::new())? {
                return match result.as_i64() {
                    Some(hash) => Ok(Value::Int(hash)),
                    None => ExcType::TypeError.err("__hash__ method should return an integer"),
                };
            }
        }
        Ok(Value::Int(value.py_hash()?))
    }
}

fn abs_type_error(value: &Value) -> RunResult<Value> {
    ExcType::TypeError.err(format!("bad operand type for abs(): '{}'", value.type_name()))
}

fn round_type_error(value: &Value) -> RunResult<Value> {
    ExcType::TypeError.err(format!(
        "type {} doesn't define __round__ method",
        value.type_name()
    ))
}

/// Rounds an integer to a negative number of digits, half to even.
fn round_int(i: &BigInt, digits: i64) -> RunResult<Value> {
    let Some(exp) = u32::try_from(digits.unsigned_abs()).ok().filter(|e| *e < 4300) else {
        return Ok(Value::Int(0));
    };
    let unit = num_traits::pow(BigInt::from(10), exp as usize);
    let (quotient, remainder) = num_integer::Integer::div_mod_floor(i, &unit);
    let twice = &remainder * 2;
    let round_up = twice > unit || (twice == unit && num_integer::Integer::is_odd(&quotient));
    let quotient = if round_up { quotient + 1 } else { quotient };
    Ok(Value::from_bigint(quotient * unit))
}

/// Rounds a float to `digits` decimal places using the shortest correctly
/// rounded decimal representation.
fn round_float(f: f64, digits: i64) -> f64 {
    if !f.is_finite() {
        return f;
    }
    if digits >= 0 {
        let Ok(precision) = usize::try_from(digits.min(320)) else {
            return f;
        };
        return format!("{f:.precision$}").parse().unwrap_or(f);
    }
    let scale = 10f64.powi(i32::try_from(-digits).unwrap_or(i32::MAX));
    if !scale.is_finite() {
        return 0.0 * f.signum();
    }
    (f / scale).round_ties_even() * scale
}

pub(super) fn chr(value: &Value) -> RunResult<Value> {
    let Some(code) = value.as_i64() else {
        return ExcType::TypeError.err(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ));
    };
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::from(c.to_string()))
        .ok_or_else(|| ExcType::ValueError.raise("chr() arg not in range(0x110000)"))
}

pub(super) fn ord(value: &Value) -> RunResult<Value> {
    let Value::Str(s) = value else {
        return ExcType::TypeError.err(format!(
            "ord() expected string of length 1, but {} found",
            value.type_name()
        ));
    };
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
        _ => ExcType::TypeError.err(format!(
            "ord() expected a character, but string of length {} found",
            s.chars().count()
        )),
    }
}

/// `hex()`, `bin()` and `oct()`.
pub(super) fn radix_string(builtin: Builtin, value: &Value) -> RunResult<Value> {
    let Some(i) = value.as_bigint() else {
        return ExcType::TypeError.err(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ));
    };
    let (radix, prefix) = match builtin {
        Builtin::Hex => (16, "0x"),
        Builtin::Bin => (2, "0b"),
        _ => (8, "0o"),
    };
    let digits = i.magnitude().to_str_radix(radix);
    let sign = if i.is_negative() { "-" } else { "" };
    Ok(Value::from(format!("{sign}{prefix}{digits}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_float_matches_python() {
        assert_eq!(round_float(2.675, 2), 2.67);
        assert_eq!(round_float(1.5, 0), 2.0);
        assert_eq!(round_float(2.5, 0), 2.0);
        assert_eq!(round_float(1234.5, -2), 1200.0);
    }

    #[test]
    fn round_int_half_to_even() {
        let rounded = round_int(&BigInt::from(250), -2).unwrap();
        assert_eq!(rounded.as_i64(), Some(200));
        let rounded = round_int(&BigInt::from(350), -2).unwrap();
        assert_eq!(rounded.as_i64(), Some(400));
        let rounded = round_int(&BigInt::from(-151), -2).unwrap();
        assert_eq!(rounded.as_i64(), Some(-200));
    }

    #[test]
    fn radix_strings() {
        let hex = radix_string(Builtin::Hex, &Value::Int(-255)).unwrap();
        assert_eq!(hex.py_str(), "-0xff");
        let bin = radix_string(Builtin::Bin, &Value::Int(5)).unwrap();
        assert_eq!(bin.py_str(), "0b101");
        assert!(radix_string(Builtin::Oct, &Value::Float(1.0)).is_err());
    }
}

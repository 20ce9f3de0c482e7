//! The `math` module.

use std::rc::Rc;

use num_bigint::BigInt;
use num_integer::{Integer, Roots};
use num_traits::{One, Signed, Zero};
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::{
    builtins::NativeFunction,
    exception::{ExcType, RunResult},
    expressions::Operator,
    function::Module,
    io::PrintWriter,
    modules::{float_arg, native_module},
    ops::float_to_bigint,
    run::Interp,
    tracer::Tracer,
    value::Value,
};

/// Functions of the `math` module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum MathFunctions {
    // Rounding
    Ceil,
    Floor,
    Trunc,
    Fabs,
    Copysign,
    // Powers and logarithms
    Sqrt,
    Pow,
    Exp,
    Log,
    Log2,
    Log10,
    // Trigonometry
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Hypot,
    Degrees,
    Radians,
    // Integers
    Factorial,
    Gcd,
    Lcm,
    Isqrt,
    Comb,
    Perm,
    // Classification
    Isfinite,
    Isinf,
    Isnan,
    Isclose,
    // Sums
    Fsum,
    Prod,
}

pub(crate) fn create_module() -> Rc<Module> {
    let constants = [
        ("pi", Value::Float(std::f64::consts::PI)),
        ("e", Value::Float(std::f64::consts::E)),
        ("tau", Value::Float(std::f64::consts::TAU)),
        ("inf", Value::Float(f64::INFINITY)),
        ("nan", Value::Float(f64::NAN)),
    ];
    let functions = MathFunctions::iter().map(|f| (f.into(), Value::Native(NativeFunction::Math(f))));
    native_module("math", constants.into_iter().chain(functions))
}

fn domain_error<V>() -> RunResult<V> {
    ExcType::ValueError.err("math domain error")
}

/// Checks a math result: NaN from finite input is a domain error, infinity a range error.
fn checked(result: f64, inputs: &[f64]) -> RunResult<Value> {
    let finite_inputs = inputs.iter().all(|f| f.is_finite());
    if result.is_nan() && !inputs.iter().any(|f| f.is_nan()) {
        return domain_error();
    }
    if result.is_infinite() && finite_inputs {
        return ExcType::OverflowError.err("math range error");
    }
    Ok(Value::Float(result))
}

fn arity(function: MathFunctions, args: &[Value], count: usize) -> RunResult<()> {
    if args.len() == count {
        return Ok(());
    }
    let message = match count {
        1 => format!("math.{function}() takes exactly one argument ({} given)", args.len()),
        _ => format!("{function} expected {count} arguments, got {}", args.len()),
    };
    ExcType::TypeError.err(message)
}

fn integer(value: &Value) -> RunResult<BigInt> {
    match value {
        Value::Float(_) => ExcType::TypeError.err("'float' object cannot be interpreted as an integer"),
        _ => value.as_bigint().ok_or_else(|| {
            ExcType::TypeError.raise(format!(
                "'{}' object cannot be interpreted as an integer",
                value.type_name()
            ))
        }),
    }
}

impl<T: Tracer, P: PrintWriter> Interp<'_, T, P> {
    pub(crate) fn call_math(&mut self, function: MathFunctions, args: &[Value]) -> RunResult<Value> {
        let name: &'static str = function.into();
        match function {
            MathFunctions::Ceil | MathFunctions::Floor | MathFunctions::Trunc => {
                arity(function, args, 1)?;
                if args[0].is_int_like() {
                    return Ok(Value::from_bigint(args[0].as_bigint().unwrap_or_default()));
                }
                if let Value::Instance(instance) = &args[0] {
                    let dunder = format!("__{name}__");
                    if let Some(result) = self.call_dunder(instance, &dunder, Vec::new())? {
                        return Ok(result);
                    }
                }
                let f = float_arg(name, &args[0])?;
                let rounded = match function {
                    MathFunctions::Ceil => f.ceil(),
                    MathFunctions::Floor => f.floor(),
                    _ => f.trunc(),
                };
                Ok(Value::from_bigint(float_to_bigint(rounded)?))
            }
            MathFunctions::Fabs => {
                arity(function, args, 1)?;
                Ok(Value::Float(float_arg(name, &args[0])?.abs()))
            }
            MathFunctions::Copysign => {
                arity(function, args, 2)?;
                let (x, y) = (float_arg(name, &args[0])?, float_arg(name, &args[1])?);
                Ok(Value::Float(x.copysign(y)))
            }
            MathFunctions::Sqrt => {
                arity(function, args, 1)?;
                let x = float_arg(name, &args[0])?;
                if x < 0.0 {
                    return domain_error();
                }
                Ok(Value::Float(x.sqrt()))
            }
            MathFunctions::Pow => {
                arity(function, args, 2)?;
                let (x, y) = (float_arg(name, &args[0])?, float_arg(name, &args[1])?);
                if x == 0.0 && y < 0.0 {
                    return domain_error();
                }
                checked(x.powf(y), &[x, y])
            }
            MathFunctions::Exp => {
                arity(function, args, 1)?;
                let x = float_arg(name, &args[0])?;
                checked(x.exp(), &[x])
            }
            MathFunctions::Log => {
                if args.is_empty() || args.len() > 2 {
                    return ExcType::TypeError.err(format!("log expected 1 or 2 arguments, got {}", args.len()));
                }
                let x = self.log_of(&args[0], std::f64::consts::E)?;
                match args.get(1) {
                    None => Ok(Value::Float(x)),
                    Some(base) => {
                        let base = self.log_of(base, std::f64::consts::E)?;
                        if base == 0.0 {
                            return ExcType::ZeroDivisionError.err("float division by zero");
                        }
                        Ok(Value::Float(x / base))
                    }
                }
            }
            MathFunctions::Log2 => {
                arity(function, args, 1)?;
                Ok(Value::Float(self.log_of(&args[0], 2.0)?))
            }
            MathFunctions::Log10 => {
                arity(function, args, 1)?;
                Ok(Value::Float(self.log_of(&args[0], 10.0)?))
            }
            MathFunctions::Sin
            | MathFunctions::Cos
            | MathFunctions::Tan
            | MathFunctions::Asin
            | MathFunctions::Acos
            | MathFunctions::Atan
            | MathFunctions::Degrees
            | MathFunctions::Radians => {
                arity(function, args, 1)?;
                let x = float_arg(name, &args[0])?;
                let result = match function {
                    MathFunctions::Sin => x.sin(),
                    MathFunctions::Cos => x.cos(),
                    MathFunctions::Tan => x.tan(),
                    MathFunctions::Asin => x.asin(),
                    MathFunctions::Acos => x.acos(),
                    MathFunctions::Atan => x.atan(),
                    MathFunctions::Degrees => x.to_degrees(),
                    _ => x.to_radians(),
                };
                if x.is_infinite() && matches!(function, MathFunctions::Sin | MathFunctions::Cos | MathFunctions::Tan) {
                    return domain_error();
                }
                checked(result, &[x])
            }
            MathFunctions::Atan2 => {
                arity(function, args, 2)?;
                let (y, x) = (float_arg(name, &args[0])?, float_arg(name, &args[1])?);
                Ok(Value::Float(y.atan2(x)))
            }
            MathFunctions::Hypot => {
                let mut total: f64 = 0.0;
                for arg in args {
                    total = total.hypot(float_arg(name, arg)?);
                }
                Ok(Value::Float(total))
            }
            MathFunctions::Factorial => {
                arity(function, args, 1)?;
                let n = integer(&args[0])?;
                if n.is_negative() {
                    return ExcType::ValueError.err("factorial() not defined for negative values");
                }
                let mut result = BigInt::one();
                let mut i = BigInt::from(2);
                while i <= n {
                    result *= &i;
                    i += 1;
                }
                Ok(Value::from_bigint(result))
            }
            MathFunctions::Gcd | MathFunctions::Lcm => {
                let mut result = if function == MathFunctions::Gcd { BigInt::zero() } else { BigInt::one() };
                for arg in args {
                    let n = integer(arg)?;
                    result = if function == MathFunctions::Gcd { result.gcd(&n) } else { result.lcm(&n) };
                }
                Ok(Value::from_bigint(result))
            }
            MathFunctions::Isqrt => {
                arity(function, args, 1)?;
                let n = integer(&args[0])?;
                if n.is_negative() {
                    return ExcType::ValueError.err("isqrt() argument must be nonnegative");
                }
                Ok(Value::from_bigint(n.sqrt()))
            }
            MathFunctions::Comb | MathFunctions::Perm => {
                let min = if function == MathFunctions::Comb { 2 } else { 1 };
                if args.len() < min || args.len() > 2 {
                    return ExcType::TypeError.err(format!("{name} expected 2 arguments, got {}", args.len()));
                }
                let n = integer(&args[0])?;
                let k = match args.get(1) {
                    Some(Value::None) | None => n.clone(),
                    Some(k) => integer(k)?,
                };
                if n.is_negative() {
                    return ExcType::ValueError.err("n must be a non-negative integer");
                }
                if k.is_negative() {
                    return ExcType::ValueError.err("k must be a non-negative integer");
                }
                if k > n {
                    return Ok(Value::Int(0));
                }
                let mut result = BigInt::one();
                let mut i = BigInt::zero();
                while i < k {
                    result *= &n - &i;
                    i += 1;
                }
                if function == MathFunctions::Comb {
                    let mut divisor = BigInt::one();
                    let mut i = BigInt::from(2);
                    while i <= k {
                        divisor *= &i;
                        i += 1;
                    }
                    result /= divisor;
                }
                Ok(Value::from_bigint(result))
            }
            MathFunctions::Isfinite | MathFunctions::Isinf | MathFunctions::Isnan => {
                arity(function, args, 1)?;
                let x = float_arg(name, &args[0])?;
                Ok(Value::Bool(match function {
                    MathFunctions::Isfinite => x.is_finite(),
                    MathFunctions::Isinf => x.is_infinite(),
                    _ => x.is_nan(),
                }))
            }
            MathFunctions::Isclose => {
                arity(function, args, 2)?;
                let (a, b) = (float_arg(name, &args[0])?, float_arg(name, &args[1])?);
                Ok(Value::Bool(is_close(a, b, 1e-9, 0.0)))
            }
            MathFunctions::Fsum => {
                arity(function, args, 1)?;
                let mut values = Vec::new();
                for item in self.iterate(&args[0])? {
                    values.push(float_arg(name, &item)?);
                }
                Ok(Value::Float(precise_sum(&values)))
            }
            MathFunctions::Prod => {
                arity(function, args, 1)?;
                let mut total = Value::Int(1);
                for item in self.iterate(&args[0])? {
                    total = self.binary_op(&total, Operator::Mult, &item)?;
                }
                Ok(total)
            }
        }
    }

    /// Logarithm in `base`, computed exactly enough for huge integers.
    fn log_of(&mut self, value: &Value, base: f64) -> RunResult<f64> {
        if let Value::LongInt(i) = value {
            if !i.is_positive() {
                return domain_error();
            }
            // log(m * 2**shift) = log(m) + shift * log(2), keeping m within f64 range.
            let bits = i.bits();
            let shift = bits.saturating_sub(64);
            let mantissa: BigInt = &**i >> shift;
            let mantissa = Value::from_bigint(mantissa).as_f64().unwrap_or(1.0);
            let ln = mantissa.ln() + shift as f64 * std::f64::consts::LN_2;
            return Ok(ln / base.ln());
        }
        let x = float_arg("log", value)?;
        if x <= 0.0 {
            return domain_error();
        }
        Ok(if base == 2.0 {
            x.log2()
        } else if base == 10.0 {
            x.log10()
        } else {
            x.ln()
        })
    }
}

fn is_close(a: f64, b: f64, rel_tol: f64, abs_tol: f64) -> bool {
    if a == b {
        return true;
    }
    if a.is_infinite() || b.is_infinite() {
        return false;
    }
    let diff = (b - a).abs();
    diff <= (rel_tol * b).abs() || diff <= (rel_tol * a).abs() || diff <= abs_tol
}

/// Neumaier summation, close to `math.fsum` for everyday inputs.
fn precise_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut compensation = 0.0;
    for &x in values {
        let t = sum + x;
        if f64::abs(sum) >= f64::abs(x) {
            compensation += (sum - t) + x;
        } else {
            compensation += (x - t) + sum;
        }
        sum = t;
    }
    sum + compensation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fsum_compensates() {
        let values = vec![0.1; 10];
        assert_eq!(precise_sum(&values), 1.0);
    }

    #[test]
    fn isclose_defaults() {
        assert!(is_close(1.0, 1.0 + 1e-12, 1e-9, 0.0));
        assert!(!is_close(1.0, 1.1, 1e-9, 0.0));
        assert!(!is_close(f64::INFINITY, 1.0, 1e-9, 0.0));
    }

    #[test]
    fn range_and_domain_errors() {
        assert!(checked(f64::NAN, &[1.0]).is_err());
        assert!(checked(f64::INFINITY, &[1000.0]).is_err());
        assert!(checked(f64::INFINITY, &[f64::INFINITY]).is_ok());
    }
}

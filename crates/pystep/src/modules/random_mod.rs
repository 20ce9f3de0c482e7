//! The `random` module, backed by the interpreter's ChaCha generator.
//!
//! `random.seed(x)` makes every following call deterministic for the rest of
//! the run. The sequences differ from CPython's Mersenne Twister.

use std::rc::Rc;

use rand::{Rng, SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::{
    builtins::{NativeFunction, check_arg_count},
    exception::{ExcType, RunResult},
    function::Module,
    io::PrintWriter,
    modules::{float_arg, int_arg, native_module},
    run::Interp,
    tracer::Tracer,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum RandomFunctions {
    Seed,
    Random,
    Uniform,
    Randint,
    Randrange,
    Choice,
    Shuffle,
    Sample,
}

pub(crate) fn create_module() -> Rc<Module> {
    let functions = RandomFunctions::iter().map(|f| (f.into(), Value::Native(NativeFunction::Random(f))));
    native_module("random", functions)
}

/// FNV-1a over the value's repr, so string and integer seeds are stable across runs.
fn seed_of(value: &Value) -> u64 {
    if let Some(i) = value.as_i64() {
        return i.unsigned_abs();
    }
    value.repr().bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

impl<T: Tracer, P: PrintWriter> Interp<'_, T, P> {
    pub(crate) fn call_random(&mut self, function: RandomFunctions, args: Vec<Value>) -> RunResult<Value> {
        let name: &'static str = function.into();
        match function {
            RandomFunctions::Seed => {
                check_arg_count(name, &args, 0, 1)?;
                self.rng = match args.first() {
                    None | Some(Value::None) => ChaCha8Rng::from_entropy(),
                    Some(value) => ChaCha8Rng::seed_from_u64(seed_of(value)),
                };
                Ok(Value::None)
            }
            RandomFunctions::Random => {
                check_arg_count(name, &args, 0, 0)?;
                Ok(Value::Float(self.rng.r#gen::<f64>()))
            }
            RandomFunctions::Uniform => {
                check_arg_count(name, &args, 2, 2)?;
                let a = float_arg(name, &args[0])?;
                let b = float_arg(name, &args[1])?;
                Ok(Value::Float(a + (b - a) * self.rng.r#gen::<f64>()))
            }
            RandomFunctions::Randint => {
                check_arg_count(name, &args, 2, 2)?;
                let (a, b) = (int_arg(&args[0])?, int_arg(&args[1])?);
                if a > b {
                    return ExcType::ValueError.err(format!("empty range in randrange({a}, {})", b.saturating_add(1)));
                }
                Ok(Value::Int(self.rng.gen_range(a..=b)))
            }
            RandomFunctions::Randrange => {
                check_arg_count(name, &args, 1, 3)?;
                let ints = args.iter().map(int_arg).collect::<RunResult<Vec<_>>>()?;
                let (start, stop, step) = match ints[..] {
                    [stop] => (0, stop, 1),
                    [start, stop] => (start, stop, 1),
                    [start, stop, step] => (start, stop, step),
                    _ => unreachable!("arity checked above"),
                };
                if step == 0 {
                    return ExcType::ValueError.err("zero step for randrange()");
                }
                let width = i128::from(stop) - i128::from(start);
                let count = if step > 0 {
                    (width + i128::from(step) - 1) / i128::from(step)
                } else {
                    (width + i128::from(step) + 1) / i128::from(step)
                };
                if count <= 0 {
                    return ExcType::ValueError.err(format!("empty range in randrange({start}, {stop}, {step})"));
                }
                let pick = self.rng.gen_range(0..count);
                let value = i128::from(start) + pick * i128::from(step);
                Ok(Value::Int(i64::try_from(value).unwrap_or(start)))
            }
            RandomFunctions::Choice => {
                check_arg_count(name, &args, 1, 1)?;
                let items = self.iterate(&args[0])?;
                items
                    .choose(&mut self.rng)
                    .cloned()
                    .ok_or_else(|| ExcType::IndexError.raise("Cannot choose from an empty sequence"))
            }
            RandomFunctions::Shuffle => {
                check_arg_count(name, &args, 1, 1)?;
                let Value::List(items) = &args[0] else {
                    return ExcType::TypeError.err(format!(
                        "'{}' object does not support item assignment",
                        args[0].type_name()
                    ));
                };
                items.borrow_mut().shuffle(&mut self.rng);
                Ok(Value::None)
            }
            RandomFunctions::Sample => {
                check_arg_count(name, &args, 2, 2)?;
                let population = self.iterate(&args[0])?;
                let k = int_arg(&args[1])?;
                let Some(k) = usize::try_from(k).ok().filter(|k| *k <= population.len()) else {
                    return ExcType::ValueError.err("Sample larger than population or is negative");
                };
                let picked = rand::seq::index::sample(&mut self.rng, population.len(), k)
                    .into_iter()
                    .map(|i| population[i].clone())
                    .collect();
                Ok(Value::list(picked))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_are_stable() {
        assert_eq!(seed_of(&Value::Int(42)), 42);
        assert_eq!(seed_of(&Value::from("abc")), seed_of(&Value::from("abc")));
        assert_ne!(seed_of(&Value::from("abc")), seed_of(&Value::from("abd")));
    }
}

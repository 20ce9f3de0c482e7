//! Format-spec mini-language used by f-strings and `format()`.

use std::str::FromStr;

use crate::{
    exception::{ExcType, RunResult},
    expressions::FStringPart,
    value::{Value, float_repr},
};

/// Format spec attached to an f-string interpolation.
#[derive(Debug, Clone)]
pub(crate) enum FormatSpec {
    /// Spec without nested interpolations, parsed at compile time.
    Static(ParsedFormatSpec),
    /// Spec such as `{x:{width}}` that must be rendered before parsing.
    Dynamic(Vec<FStringPart>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Align {
    Left,
    Right,
    Center,
    /// `=`: padding goes between the sign and the digits.
    AfterSign,
}

/// Parsed `[[fill]align][sign][#][0][width][,|_][.precision][type]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ParsedFormatSpec {
    pub fill: Option<char>,
    pub align: Option<Align>,
    pub sign: Option<char>,
    pub alternate: bool,
    pub zero: bool,
    pub width: Option<usize>,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub ty: Option<char>,
}

fn parse_align(c: char) -> Option<Align> {
    match c {
        '<' => Some(Align::Left),
        '>' => Some(Align::Right),
        '^' => Some(Align::Center),
        '=' => Some(Align::AfterSign),
        _ => None,
    }
}

impl FromStr for ParsedFormatSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chars: Vec<char> = s.chars().collect();
        let mut spec = Self::default();
        let mut i = 0;

        if chars.len() >= 2
            && let Some(align) = parse_align(chars[1])
        {
            spec.fill = Some(chars[0]);
            spec.align = Some(align);
            i = 2;
        } else if let Some(align) = chars.first().copied().and_then(parse_align) {
            spec.align = Some(align);
            i = 1;
        }
        if let Some(&c) = chars.get(i)
            && matches!(c, '+' | '-' | ' ')
        {
            spec.sign = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'#') {
            spec.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            spec.zero = true;
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i > start {
            let digits: String = chars[start..i].iter().collect();
            spec.width = Some(digits.parse().map_err(|_| s.to_owned())?);
        }
        if let Some(&c) = chars.get(i)
            && matches!(c, ',' | '_')
        {
            spec.grouping = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(char::is_ascii_digit) {
                i += 1;
            }
            if i == start {
                return Err(s.to_owned());
            }
            let digits: String = chars[start..i].iter().collect();
            spec.precision = Some(digits.parse().map_err(|_| s.to_owned())?);
        }
        if let Some(&c) = chars.get(i) {
            if !"bcdeEfFgGnosxX%".contains(c) {
                return Err(s.to_owned());
            }
            spec.ty = Some(c);
            i += 1;
        }
        if i != chars.len() {
            return Err(s.to_owned());
        }
        Ok(spec)
    }
}

/// Formats `value` according to `spec`, the way `format(value, spec)` does.
///
/// `plain` is the value's `str()` form, used for the string presentation.
pub(crate) fn format_with_spec(value: &Value, plain: &str, spec: &ParsedFormatSpec) -> RunResult<String> {
    let type_name = value.type_name();
    let (body, numeric) = match (value, spec.ty) {
        (Value::Str(_), None | Some('s')) => {
            let mut text = plain.to_owned();
            if let Some(precision) = spec.precision {
                text = text.chars().take(precision).collect();
            }
            (text, false)
        }
        (Value::Int(_) | Value::Bool(_) | Value::LongInt(_), None | Some('d' | 'n')) => {
            let text = value.as_bigint().map(|i| i.to_string()).unwrap_or_default();
            (text, true)
        }
        (Value::Int(_) | Value::Bool(_) | Value::LongInt(_), Some(ty @ ('x' | 'X' | 'o' | 'b'))) => {
            let big = value.as_bigint().unwrap_or_default();
            let radix = match ty {
                'x' | 'X' => 16,
                'o' => 8,
                _ => 2,
            };
            let negative = big.sign() == num_bigint::Sign::Minus;
            let mut digits = big.magnitude().to_str_radix(radix);
            if ty == 'X' {
                digits = digits.to_uppercase();
            }
            if spec.alternate {
                let prefix = match ty {
                    'x' => "0x",
                    'X' => "0X",
                    'o' => "0o",
                    _ => "0b",
                };
                digits.insert_str(0, prefix);
            }
            if negative {
                digits.insert(0, '-');
            }
            (digits, true)
        }
        (Value::Int(_) | Value::Bool(_) | Value::LongInt(_), Some('c')) => {
            let code = value.as_i64().and_then(|i| u32::try_from(i).ok()).and_then(char::from_u32);
            match code {
                Some(c) => (c.to_string(), false),
                None => return ExcType::OverflowError.err("%c arg not in range(0x110000)"),
            }
        }
        (
            Value::Int(_) | Value::Bool(_) | Value::LongInt(_) | Value::Float(_),
            Some(ty @ ('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%')),
        ) => {
            let f = value.as_f64().unwrap_or_default();
            (format_float(f, ty, spec.precision), true)
        }
        (Value::Float(f), None) => {
            let text = match spec.precision {
                Some(precision) => format_float(*f, 'g', Some(precision)),
                None => float_repr(*f),
            };
            (text, true)
        }
        (_, None) => (plain.to_owned(), false),
        (_, Some(ty)) => {
            return ExcType::ValueError.err(format!(
                "Unknown format code '{ty}' for object of type '{type_name}'"
            ));
        }
    };

    let (sign, digits) = if numeric {
        match body.strip_prefix('-') {
            Some(rest) => ("-".to_owned(), rest.to_owned()),
            None => {
                let sign = match spec.sign {
                    Some('+') => "+",
                    Some(' ') => " ",
                    _ => "",
                };
                (sign.to_owned(), body)
            }
        }
    } else {
        (String::new(), body)
    };
    let digits = match spec.grouping {
        Some(sep) if numeric => group_digits(&digits, sep),
        _ => digits,
    };

    let width = spec.width.unwrap_or(0);
    let len = sign.chars().count() + digits.chars().count();
    if len >= width {
        return Ok(format!("{sign}{digits}"));
    }
    let pad = width - len;
    let (fill, align) = if spec.zero && spec.align.is_none() && numeric {
        ('0', Align::AfterSign)
    } else {
        let default_align = if numeric { Align::Right } else { Align::Left };
        (spec.fill.unwrap_or(' '), spec.align.unwrap_or(default_align))
    };
    let padding = |n: usize| fill.to_string().repeat(n);
    Ok(match align {
        Align::Left => format!("{sign}{digits}{}", padding(pad)),
        Align::Right => format!("{}{sign}{digits}", padding(pad)),
        Align::Center => format!("{}{sign}{digits}{}", padding(pad / 2), padding(pad - pad / 2)),
        Align::AfterSign => format!("{sign}{}{digits}", padding(pad)),
    })
}

/// Inserts a thousands separator into the integer part of `digits`.
fn group_digits(digits: &str, sep: char) -> String {
    let split = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    let (int_part, rest) = digits.split_at(split);
    let mut grouped = String::with_capacity(digits.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(sep);
        }
        grouped.push(c);
    }
    grouped.push_str(rest);
    grouped
}

/// Fixed, exponent, general and percent float presentations.
fn format_float(f: f64, ty: char, precision: Option<usize>) -> String {
    if f.is_nan() {
        return if ty.is_ascii_uppercase() { "NAN" } else { "nan" }.to_owned();
    }
    if f.is_infinite() {
        let text = if f < 0.0 { "-inf" } else { "inf" };
        return if ty.is_ascii_uppercase() { text.to_uppercase() } else { text.to_owned() };
    }
    let precision = precision.unwrap_or(6);
    match ty {
        'f' | 'F' => format!("{f:.precision$}"),
        '%' => format!("{:.precision$}%", f * 100.0),
        'e' | 'E' => {
            let text = fix_exponent(&format!("{f:.precision$e}"));
            if ty == 'E' { text.to_uppercase() } else { text }
        }
        _ => {
            let precision = precision.max(1);
            if f == 0.0 {
                return "0".to_owned();
            }
            let exponent = f.abs().log10().floor() as i32;
            let text = if exponent < -4 || exponent >= i32::try_from(precision).unwrap_or(i32::MAX) {
                let mantissa_digits = precision - 1;
                let text = fix_exponent(&format!("{f:.mantissa_digits$e}"));
                strip_fraction_zeros_exp(&text)
            } else {
                let decimals = usize::try_from(i32::try_from(precision).unwrap_or(i32::MAX) - 1 - exponent).unwrap_or(0);
                strip_fraction_zeros(&format!("{f:.decimals$}"))
            };
            if ty == 'G' { text.to_uppercase() } else { text }
        }
    }
}

/// Rust writes `1.5e3`, Python writes `1.5e+03`.
fn fix_exponent(text: &str) -> String {
    let Some(pos) = text.find('e') else {
        return text.to_owned();
    };
    let (mantissa, exp) = text.split_at(pos);
    let exp = &exp[1..];
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exp),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

fn strip_fraction_zeros(text: &str) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_owned()
    } else {
        text.to_owned()
    }
}

fn strip_fraction_zeros_exp(text: &str) -> String {
    match text.find('e') {
        Some(pos) => {
            let (mantissa, exp) = text.split_at(pos);
            format!("{}{exp}", strip_fraction_zeros(mantissa))
        }
        None => strip_fraction_zeros(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(value: Value, spec: &str) -> String {
        let spec: ParsedFormatSpec = spec.parse().unwrap();
        let plain = value.py_str();
        format_with_spec(&value, &plain, &spec).unwrap()
    }

    #[test]
    fn parses_full_spec() {
        let spec: ParsedFormatSpec = "*^+#010,.3f".parse().unwrap();
        assert_eq!(spec.fill, Some('*'));
        assert_eq!(spec.align, Some(Align::Center));
        assert_eq!(spec.sign, Some('+'));
        assert!(spec.alternate);
        assert!(spec.zero);
        assert_eq!(spec.width, Some(10));
        assert_eq!(spec.grouping, Some(','));
        assert_eq!(spec.precision, Some(3));
        assert_eq!(spec.ty, Some('f'));
        assert!("3.".parse::<ParsedFormatSpec>().is_err());
    }

    #[test]
    fn formats_numbers_like_python() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Int(1_234_567), ","), "1,234,567");
        assert_eq!(fmt(Value::Int(42), "05d"), "00042");
        assert_eq!(fmt(Value::Int(255), "#x"), "0xff");
        assert_eq!(fmt(Value::Float(0.25), ".1%"), "25.0%");
        assert_eq!(fmt(Value::Float(12345.678), ".3e"), "1.235e+04");
        assert_eq!(fmt(Value::Float(2.5), ".3g"), "2.5");
    }

    #[test]
    fn pads_and_aligns_strings() {
        assert_eq!(fmt(Value::from("ab"), "5"), "ab   ");
        assert_eq!(fmt(Value::from("ab"), ">5"), "   ab");
        assert_eq!(fmt(Value::from("ab"), "-^6"), "--ab--");
        assert_eq!(fmt(Value::Int(7), "<3"), "7  ");
    }
}

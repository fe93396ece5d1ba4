//! Field mapper: flattened response + field definitions -> normalized variables.

use std::str::FromStr;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;

use crate::error::{CycleError, Result};
use crate::fields::{FieldDefinition, FieldType};
use crate::flatten::RawMap;
use crate::variables::{Variable, VariableMap};

/// Outcome counters of one mapping pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingStats {
    pub written: usize,
    pub skipped_absent: usize,
    pub skipped_taken: usize,
}

/// Map `raw` through `fields` into a fresh variable map.
pub fn calculate(raw: &RawMap, fields: &[FieldDefinition], offset: Decimal) -> Result<VariableMap> {
    let mut out = VariableMap::new();
    calculate_into(raw, fields, offset, &mut out)?;
    Ok(out)
}

/// Map `raw` through `fields`, adding to `out`.
///
/// Definitions are applied in order. Absent source keys are skipped; names
/// already present in `out` are left alone.
pub fn calculate_into(
    raw: &RawMap,
    fields: &[FieldDefinition],
    offset: Decimal,
    out: &mut VariableMap,
) -> Result<MappingStats> {
    let mut stats = MappingStats::default();
    for field in fields {
        let Some(value) = raw.get(&field.source) else {
            stats.skipped_absent += 1;
            continue;
        };
        if out.contains(&field.name) {
            stats.skipped_taken += 1;
            continue;
        }
        let typed = coerce(field, value.as_str(), offset)?;
        out.insert_if_absent(&field.name, typed);
        stats.written += 1;
    }
    Ok(stats)
}

fn coerce(field: &FieldDefinition, raw: &str, offset: Decimal) -> Result<Variable> {
    let mismatch = || CycleError::TypeCoercion {
        field: field.name.clone(),
        source_key: field.source.clone(),
        value: raw.to_string(),
        expected: field.kind.as_str(),
    };

    match field.kind {
        FieldType::Decimal => {
            let value = parse_decimal(raw).ok_or_else(mismatch)?;
            let value = if field.offset {
                value.checked_add(offset).ok_or_else(mismatch)?
            } else {
                value
            };
            Ok(Variable::Decimal(value))
        }
        FieldType::Timestamp => {
            let ms: i64 = raw.trim().parse().map_err(|_| mismatch())?;
            let ts = Utc.timestamp_millis_opt(ms).single().ok_or_else(mismatch)?;
            Ok(Variable::Timestamp(ts))
        }
        FieldType::Label => Ok(Variable::Label(raw.to_string())),
    }
}

/// Largest exponent worth trying; anything beyond overflows a `Decimal`.
const MAX_EXPONENT: i64 = 60;

/// Parts of a plain base-10 number: `[+-]digits[.digits][(e|E)[+-]digits]`.
struct NumberText<'a> {
    mantissa: &'a str,
    int_digits: &'a str,
    frac_digits: &'a str,
    exponent: i64,
}

impl<'a> NumberText<'a> {
    fn split(raw: &'a str) -> Option<Self> {
        let (mantissa, exponent) = match raw.split_once(|c: char| c == 'e' || c == 'E') {
            Some((m, e)) => (m, parse_exponent(e)?),
            None => (raw, 0),
        };
        let unsigned = mantissa.strip_prefix(|c: char| c == '+' || c == '-').unwrap_or(mantissa);
        let (int_digits, frac_digits) = match unsigned.split_once('.') {
            Some((i, f)) if !f.is_empty() => (i, f),
            Some(_) => return None,
            None => (unsigned, ""),
        };
        if int_digits.is_empty() || !all_digits(int_digits) || !all_digits(frac_digits) {
            return None;
        }
        Some(Self {
            mantissa,
            int_digits,
            frac_digits,
            exponent,
        })
    }

    /// Scale of the value once trailing zeros are dropped.
    fn significant_scale(&self) -> u32 {
        let trailing_zeros = self
            .int_digits
            .bytes()
            .chain(self.frac_digits.bytes())
            .rev()
            .take_while(|&b| b == b'0')
            .count() as i64;
        let scale = self.frac_digits.len() as i64 - trailing_zeros - self.exponent;
        scale.clamp(0, i64::from(u32::MAX)) as u32
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_exponent(raw: &str) -> Option<i64> {
    let digits = raw.strip_prefix(|c: char| c == '+' || c == '-').unwrap_or(raw);
    if digits.is_empty() || !all_digits(digits) {
        return None;
    }
    raw.parse::<i64>().ok().filter(|e| e.abs() <= MAX_EXPONENT)
}

/// Parse `raw` as an exact decimal. Text that is not a plain base-10 number,
/// or that `Decimal` can only hold rounded, yields `None`.
pub(crate) fn parse_decimal(raw: &str) -> Option<Decimal> {
    let text = NumberText::split(raw.trim())?;
    let mut value = Decimal::from_str(text.mantissa).ok()?;
    if text.exponent < 0 {
        let scale = value.scale().checked_add(text.exponent.unsigned_abs() as u32)?;
        value.set_scale(scale).ok()?;
    } else {
        for _ in 0..text.exponent {
            value = value.checked_mul(Decimal::TEN)?;
        }
    }
    (value.normalize().scale() == text.significant_scale()).then_some(value)
}

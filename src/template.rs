//! Cell expressions of the table template.
//!
//! Two kinds of expressions exist. A precondition is a single comparison
//! `<key> <op> <number>`; a format is either a bare key or
//! `DATE_FORMAT(<key>, "<pattern>")`. Both are parsed once when the template
//! is loaded and evaluated against a [`VariableMap`] without failing.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::DisplayZone;
use crate::error::{CycleError, Result};
use crate::variables::{Variable, VariableMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    // Two-character operators first so `>=` is not read as `>`.
    const TOKENS: [(&'static str, CompareOp); 6] = [
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ];

    fn apply(self, lhs: Decimal, rhs: Decimal) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
        }
    }
}

/// `<key> <op> <number>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub key: String,
    pub op: CompareOp,
    pub rhs: Decimal,
}

impl Condition {
    pub fn parse(raw: &str) -> Result<Self> {
        let (pos, token, op) = CompareOp::TOKENS
            .iter()
            .filter_map(|(token, op)| raw.find(token).map(|pos| (pos, *token, *op)))
            .min_by_key(|(pos, token, _)| (*pos, std::cmp::Reverse(token.len())))
            .ok_or_else(|| template_error(raw, "no comparison operator"))?;

        let key = raw[..pos].trim();
        if !is_identifier(key) {
            return Err(template_error(raw, "left side is not a variable name"));
        }
        let rhs = Decimal::from_str(raw[pos + token.len()..].trim())
            .map_err(|_| template_error(raw, "right side is not a number"))?;
        Ok(Self {
            key: key.to_string(),
            op,
            rhs,
        })
    }

    /// False when the key is missing or has no numeric reading.
    pub fn evaluate(&self, vars: &VariableMap) -> bool {
        vars.get(&self.key)
            .and_then(numeric_value)
            .map(|lhs| self.op.apply(lhs, self.rhs))
            .unwrap_or(false)
    }
}

fn numeric_value(value: &Variable) -> Option<Decimal> {
    match value {
        Variable::Decimal(d) => Some(*d),
        Variable::Timestamp(ts) => Some(Decimal::from(ts.timestamp_millis())),
        Variable::Label(s) => Decimal::from_str(s.trim()).ok(),
    }
}

/// Value produced by a format expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Number(Decimal),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl From<&Variable> for CellValue {
    fn from(value: &Variable) -> Self {
        match value {
            Variable::Decimal(d) => CellValue::Number(*d),
            Variable::Timestamp(ts) => CellValue::Timestamp(*ts),
            Variable::Label(s) => CellValue::Text(s.clone()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Number(d) => write!(f, "{}", d),
            CellValue::Timestamp(ts) => write!(f, "{}", ts.timestamp_millis()),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatExpr {
    Lookup(String),
    DateFormat { key: String, pattern: DatePattern },
}

impl FormatExpr {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let Some(open) = trimmed.find('(') else {
            if is_identifier(trimmed) {
                return Ok(FormatExpr::Lookup(trimmed.to_string()));
            }
            return Err(template_error(raw, "not a variable name"));
        };

        let function = trimmed[..open].trim();
        if function != "DATE_FORMAT" && function != "DT_DATE_FORMAT" {
            return Err(template_error(raw, "unknown function"));
        }
        let args = trimmed[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| template_error(raw, "missing closing parenthesis"))?;
        let (key, pattern) = args
            .split_once(',')
            .ok_or_else(|| template_error(raw, "DATE_FORMAT takes two arguments"))?;
        let key = key.trim();
        if !is_identifier(key) {
            return Err(template_error(raw, "first argument is not a variable name"));
        }
        let pattern = pattern.trim();
        let pattern = pattern
            .strip_prefix('"')
            .and_then(|p| p.strip_suffix('"'))
            .ok_or_else(|| template_error(raw, "pattern must be a quoted string"))?;

        Ok(FormatExpr::DateFormat {
            key: key.to_string(),
            pattern: DatePattern::parse(pattern)?,
        })
    }

    /// `None` when the referenced variable is missing or of the wrong kind.
    pub fn evaluate(&self, vars: &VariableMap, zone: DisplayZone) -> Option<CellValue> {
        match self {
            FormatExpr::Lookup(key) => vars.get(key).map(CellValue::from),
            FormatExpr::DateFormat { key, pattern } => {
                let ts = vars.get(key)?.as_timestamp()?;
                Some(CellValue::Text(pattern.format(&ts, zone)))
            }
        }
    }
}

/// Date pattern in `dd.MM.yyyy HH:mm` notation, kept alongside its strftime form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatePattern {
    pub source: String,
    strftime: String,
}

impl DatePattern {
    pub fn parse(source: &str) -> Result<Self> {
        let chars: Vec<char> = source.chars().collect();
        let mut out = String::new();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c == '\'' {
                if chars.get(i + 1) == Some(&'\'') {
                    out.push('\'');
                    i += 2;
                    continue;
                }
                let mut j = i + 1;
                while j < chars.len() && chars[j] != '\'' {
                    push_literal(&mut out, chars[j]);
                    j += 1;
                }
                if j == chars.len() {
                    return Err(template_error(source, "unterminated quote in date pattern"));
                }
                i = j + 1;
            } else if c.is_ascii_alphabetic() {
                let mut run = 1;
                while chars.get(i + run) == Some(&c) {
                    run += 1;
                }
                let spec = match (c, run) {
                    ('y', 4) => "%Y",
                    ('y', 2) => "%y",
                    ('M', 2) => "%m",
                    ('M', 1) => "%-m",
                    ('d', 2) => "%d",
                    ('d', 1) => "%-d",
                    ('H', 2) => "%H",
                    ('H', 1) => "%-H",
                    ('m', 2) => "%M",
                    ('s', 2) => "%S",
                    ('S', 3) => "%3f",
                    _ => {
                        return Err(template_error(
                            source,
                            &format!("unsupported date field '{}'", c.to_string().repeat(run)),
                        ))
                    }
                };
                out.push_str(spec);
                i += run;
            } else {
                push_literal(&mut out, c);
                i += 1;
            }
        }

        Ok(Self {
            source: source.to_string(),
            strftime: out,
        })
    }

    pub fn format(&self, ts: &DateTime<Utc>, zone: DisplayZone) -> String {
        zone.format(ts, &self.strftime)
    }
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn template_error(expr: &str, reason: &str) -> CycleError {
    CycleError::Template(format!("'{}': {}", expr, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn vars() -> VariableMap {
        let mut map = VariableMap::new();
        map.insert_if_absent(
            "start_timestamp_hour_0",
            Variable::Timestamp(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()),
        );
        map.insert_if_absent(
            "epoch_zero",
            Variable::Timestamp(Utc.timestamp_millis_opt(0).unwrap()),
        );
        map.insert_if_absent("price", Variable::Decimal(Decimal::from_str("10.55").unwrap()));
        map.insert_if_absent("unit", Variable::Label("Eur/MWh".into()));
        map
    }

    #[test]
    fn test_parse_presence_check() {
        let c = Condition::parse("start_timestamp_hour_3 > 0").unwrap();
        assert_eq!(c.key, "start_timestamp_hour_3");
        assert_eq!(c.op, CompareOp::Gt);
        assert_eq!(c.rhs, Decimal::ZERO);
    }

    #[test]
    fn test_parse_two_char_operators() {
        assert_eq!(Condition::parse("a>=1").unwrap().op, CompareOp::Ge);
        assert_eq!(Condition::parse("a <= 1").unwrap().op, CompareOp::Le);
        assert_eq!(Condition::parse("a == 1").unwrap().op, CompareOp::Eq);
        assert_eq!(Condition::parse("a != 1").unwrap().op, CompareOp::Ne);
        assert_eq!(Condition::parse("a < -1").unwrap().rhs, Decimal::from(-1));
    }

    #[test]
    fn test_bad_conditions() {
        assert!(Condition::parse("start_timestamp_hour_0").is_err());
        assert!(Condition::parse("> 0").is_err());
        assert!(Condition::parse("a > zero").is_err());
    }

    #[test]
    fn test_presence_check_evaluation() {
        let vars = vars();
        assert!(Condition::parse("start_timestamp_hour_0 > 0").unwrap().evaluate(&vars));
        assert!(!Condition::parse("start_timestamp_hour_7 > 0").unwrap().evaluate(&vars));
        assert!(!Condition::parse("epoch_zero > 0").unwrap().evaluate(&vars));
        assert!(Condition::parse("price >= 10.55").unwrap().evaluate(&vars));
        assert!(!Condition::parse("unit > 0").unwrap().evaluate(&vars));
    }

    #[test]
    fn test_lookup_returns_value_as_is() {
        let vars = vars();
        let expr = FormatExpr::parse("price").unwrap();
        assert_eq!(
            expr.evaluate(&vars, DisplayZone::Utc),
            Some(CellValue::Number(Decimal::from_str("10.55").unwrap()))
        );
        assert_eq!(FormatExpr::parse("missing").unwrap().evaluate(&vars, DisplayZone::Utc), None);
    }

    #[test]
    fn test_date_format() {
        let vars = vars();
        let expr = FormatExpr::parse(r#"DT_DATE_FORMAT(start_timestamp_hour_0, "dd.MM.yyyy HH:mm")"#).unwrap();
        assert_eq!(
            expr.evaluate(&vars, DisplayZone::Utc),
            Some(CellValue::Text("14.11.2023 22:13".to_string()))
        );
        let hour = FormatExpr::parse(r#"DATE_FORMAT(start_timestamp_hour_0, "HH")"#).unwrap();
        let berlin = DisplayZone::parse("+01:00").unwrap();
        assert_eq!(hour.evaluate(&vars, berlin), Some(CellValue::Text("23".to_string())));
    }

    #[test]
    fn test_date_format_of_non_timestamp_is_empty() {
        let vars = vars();
        let expr = FormatExpr::parse(r#"DATE_FORMAT(price, "HH")"#).unwrap();
        assert_eq!(expr.evaluate(&vars, DisplayZone::Utc), None);
    }

    #[test]
    fn test_unknown_function_rejected() {
        assert!(FormatExpr::parse("SUM(a, b)").is_err());
        assert!(FormatExpr::parse(r#"DATE_FORMAT(a, HH)"#).is_err());
        assert!(FormatExpr::parse(r#"DATE_FORMAT(a "HH")"#).is_err());
    }

    #[test]
    fn test_date_pattern_literals() {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let p = DatePattern::parse("yyyy-MM-dd'T'HH:mm:ss.SSS '100%' ''").unwrap();
        assert_eq!(p.format(&ts, DisplayZone::Utc), "2023-11-14T22:13:20.123 100% '");
        assert!(DatePattern::parse("EEEE").is_err());
        assert!(DatePattern::parse("HH 'open").is_err());
    }
}

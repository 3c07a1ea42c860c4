//! Multi-interval range specifications.
//!
//! Grammar: intervals separated by `||`, each `[a,b]`, `(a,b]`, `[a,b)`,
//! `(a,b)` or a singleton `[a]`; endpoints are decimal, `0x…` or `0b…`.

use crate::value_fmt::parse_int_literal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    low: i128,
    high: i128,
    low_inclusive: bool,
    high_inclusive: bool,
}

impl Interval {
    fn contains_int(&self, v: i128) -> bool {
        let above = if self.low_inclusive { v >= self.low } else { v > self.low };
        let below = if self.high_inclusive { v <= self.high } else { v < self.high };
        above && below
    }

    fn contains_float(&self, v: f64) -> bool {
        let (lo, hi) = (self.low as f64, self.high as f64);
        let above = if self.low_inclusive { v >= lo } else { v > lo };
        let below = if self.high_inclusive { v <= hi } else { v < hi };
        above && below
    }
}

/// A parsed, validated union of intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSpec {
    source: String,
    intervals: Vec<Interval>,
}

impl RangeSpec {
    /// Parses a spec; empty interval lists, trailing `||` and unbalanced
    /// brackets are format errors. Messages carry no node path; the
    /// caller adds it.
    pub fn parse(spec: &str) -> Result<RangeSpec, String> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err("empty range spec".to_owned());
        }
        if trimmed.ends_with("||") || trimmed.starts_with("||") {
            return Err(format!("dangling `||` in range spec `{spec}`"));
        }

        let mut intervals = Vec::new();
        for part in trimmed.split("||") {
            intervals.push(parse_interval(part.trim(), spec)?);
        }
        Ok(RangeSpec {
            source: trimmed.to_owned(),
            intervals,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether an integer value lies in at least one interval.
    pub fn contains_int(&self, v: i128) -> bool {
        self.intervals.iter().any(|i| i.contains_int(v))
    }

    pub fn contains_float(&self, v: f64) -> bool {
        self.intervals.iter().any(|i| i.contains_float(v))
    }

    /// STRING fields are tested by character length.
    pub fn contains_len(&self, len: usize) -> bool {
        self.contains_int(len as i128)
    }
}

fn parse_interval(part: &str, whole: &str) -> Result<Interval, String> {
    if part.is_empty() {
        return Err(format!("empty interval in range spec `{whole}`"));
    }

    let mut chars = part.chars();
    let open = chars.next().unwrap();
    let close = part.chars().last().unwrap();

    let low_inclusive = match open {
        '[' => true,
        '(' => false,
        _ => return Err(format!("interval `{part}` must start with `[` or `(`")),
    };
    let high_inclusive = match close {
        ']' => true,
        ')' => false,
        _ => return Err(format!("interval `{part}` must end with `]` or `)`")),
    };

    let inner = &part[1..part.len() - 1];
    let endpoints: Vec<&str> = inner.split(',').map(str::trim).collect();
    let (low, high) = match endpoints.as_slice() {
        [single] => {
            if !(low_inclusive && high_inclusive) {
                return Err(format!("singleton `{part}` must use `[a]`"));
            }
            let v = parse_int_literal(single)?;
            (v, v)
        }
        [a, b] => (parse_int_literal(a)?, parse_int_literal(b)?),
        _ => return Err(format!("interval `{part}` must have one or two endpoints")),
    };

    if low > high {
        return Err(format!("interval `{part}` is inverted"));
    }

    Ok(Interval {
        low,
        high,
        low_inclusive,
        high_inclusive,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_endpoints() {
        let spec = RangeSpec::parse("[0,10) || (20, 0x1E] || [99]").unwrap();
        assert!(spec.contains_int(0));
        assert!(spec.contains_int(9));
        assert!(!spec.contains_int(10));
        assert!(!spec.contains_int(20));
        assert!(spec.contains_int(21));
        assert!(spec.contains_int(30));
        assert!(!spec.contains_int(31));
        assert!(spec.contains_int(99));
        assert!(!spec.contains_int(98));
    }

    #[test]
    fn binary_endpoints_and_lengths() {
        let spec = RangeSpec::parse("[0b10, 0b100]").unwrap();
        assert!(spec.contains_int(2));
        assert!(spec.contains_int(4));
        assert!(spec.contains_len(3));
        assert!(!spec.contains_len(5));
    }

    #[test]
    fn malformed_specs() {
        assert!(RangeSpec::parse("").is_err());
        assert!(RangeSpec::parse("[1,2] ||").is_err());
        assert!(RangeSpec::parse("[1,2").is_err());
        assert!(RangeSpec::parse("{1,2}").is_err());
        assert!(RangeSpec::parse("[5,2]").is_err());
        assert!(RangeSpec::parse("(3)").is_err());
        assert!(RangeSpec::parse("[1,2,3]").is_err());
    }
}

//! Per-column reducers folding decoded values into one output value.
//!
//! Integer inputs accumulate in `i64`, floating inputs in `f64`. The input
//! type is fixed when the accumulator is built; column resolution already
//! rejects reducers that cannot take that type, so a mismatching value at fold
//! time means the row disagrees with its schema and is reported, not coerced.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StatsError;
use crate::value::{Value, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatType {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl StatType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Count => "COUNT",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }

    /// Type of the finalized value for `input`, or `None` when this reducer
    /// cannot fold that input type.
    pub fn output_type(self, input: ValueType) -> Option<ValueType> {
        match self {
            Self::Count => Some(ValueType::Int),
            _ if !input.is_numeric() => None,
            Self::Avg => Some(ValueType::Double),
            Self::Sum | Self::Min | Self::Max => Some(input),
        }
    }
}

impl fmt::Display for StatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Running {
    Int(i64),
    Double(f64),
}

/// Running state of one reducer for one output column.
#[derive(Debug, Clone, PartialEq)]
pub struct StatAccumulator {
    stat: StatType,
    input: ValueType,
    count: u64,
    running: Option<Running>,
}

impl StatAccumulator {
    pub fn new(stat: StatType, input: ValueType) -> Self {
        Self {
            stat,
            input,
            count: 0,
            running: None,
        }
    }

    pub fn stat(&self) -> StatType {
        self.stat
    }

    /// Number of values folded so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn fold(&mut self, value: &Value) -> Result<(), StatsError> {
        let actual = value.value_type();
        if actual != self.input {
            return Err(StatsError::InputMismatch {
                expected: self.input,
                actual,
            });
        }
        self.count += 1;
        if self.stat == StatType::Count {
            return Ok(());
        }
        let next = match value {
            Value::Int(v) => Running::Int(*v),
            Value::Double(v) => Running::Double(*v),
            // Non-numeric input is only accepted by COUNT.
            Value::String(_) | Value::Bool(_) => {
                return Err(StatsError::InputMismatch {
                    expected: ValueType::Double,
                    actual,
                })
            }
        };
        self.running = Some(match self.running {
            None => next,
            Some(current) => combine(self.stat, current, next),
        });
        Ok(())
    }

    /// Folds another accumulator of the same reducer and input type into this one.
    pub fn merge(&mut self, other: &StatAccumulator) -> Result<(), StatsError> {
        if self.stat != other.stat {
            return Err(StatsError::IncompatibleMerge {
                left: self.stat.name(),
                right: other.stat.name(),
            });
        }
        if self.input != other.input {
            return Err(StatsError::InputMismatch {
                expected: self.input,
                actual: other.input,
            });
        }
        self.count += other.count;
        self.running = match (self.running, other.running) {
            (None, theirs) => theirs,
            (ours, None) => ours,
            (Some(ours), Some(theirs)) => Some(combine(self.stat, ours, theirs)),
        };
        Ok(())
    }

    /// Final column value. Empty SUM/MIN/MAX yield zero of the input type,
    /// empty AVG yields `0.0`.
    pub fn finalize(&self) -> Value {
        match self.stat {
            StatType::Count => Value::Int(self.count as i64),
            StatType::Avg => {
                if self.count == 0 {
                    return Value::Double(0.0);
                }
                let sum = match self.running {
                    Some(Running::Int(v)) => v as f64,
                    Some(Running::Double(v)) => v,
                    None => 0.0,
                };
                Value::Double(sum / self.count as f64)
            }
            StatType::Sum | StatType::Min | StatType::Max => match self.running {
                Some(Running::Int(v)) => Value::Int(v),
                Some(Running::Double(v)) => Value::Double(v),
                None => self.input.default_value(),
            },
        }
    }
}

fn combine(stat: StatType, left: Running, right: Running) -> Running {
    match (left, right) {
        (Running::Int(a), Running::Int(b)) => Running::Int(match stat {
            StatType::Min => a.min(b),
            StatType::Max => a.max(b),
            _ => a.wrapping_add(b),
        }),
        (a, b) => {
            let (a, b) = (as_f64(a), as_f64(b));
            Running::Double(match stat {
                StatType::Min => a.min(b),
                StatType::Max => a.max(b),
                _ => a + b,
            })
        }
    }
}

fn as_f64(running: Running) -> f64 {
    match running {
        Running::Int(v) => v as f64,
        Running::Double(v) => v,
    }
}

use core::fmt;

use crate::constants::{DELTA_MAX, DELTA_MIN};

/// Where roll deltas come from.
pub trait DeltaSource: Send + Sync + fmt::Debug {
    fn draw(&self) -> i64;
}

/// Uniform over `DELTA_MIN..=DELTA_MAX`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformDelta;

impl DeltaSource for UniformDelta {
    fn draw(&self) -> i64 {
        rand::random_range(DELTA_MIN..=DELTA_MAX)
    }
}

/// Hands out a fixed sequence of deltas, wrapping around at the end.
#[cfg(test)]
#[derive(Debug)]
pub struct ScriptedDelta {
    values: Vec<i64>,
    next: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl ScriptedDelta {
    pub fn new(values: Vec<i64>) -> Self {
        assert!(!values.is_empty(), "scripted deltas need at least one value");
        Self {
            values,
            next: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
impl DeltaSource for ScriptedDelta {
    fn draw(&self) -> i64 {
        let idx = self.next.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.values[idx % self.values.len()]
    }
}

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::warn;

/// Hard upper bound on an encodable write position
pub const RECORD_CEILING: usize = (1 << 23) - 1;

/// Broker-wide backpressure signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum HealthLevel {
    Ok = 0,
    Degraded = 1,
    Overloaded = 2,
    Overflowed = 3,
    Critical = 4,
}

impl HealthLevel {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => HealthLevel::Ok,
            1 => HealthLevel::Degraded,
            2 => HealthLevel::Overloaded,
            3 => HealthLevel::Overflowed,
            _ => HealthLevel::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLevel::Ok => "good",
            HealthLevel::Degraded => "degraded",
            HealthLevel::Overloaded => "overloaded",
            HealthLevel::Overflowed => "overflowed",
            HealthLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the health level from the ring buffer write position.
///
/// Shared between the ring buffer log, which updates it at the end of every
/// write epoch, and status consumers, which only read it.
pub struct HealthMonitor {
    capacity: usize,
    level: AtomicU8,
}

impl HealthMonitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            level: AtomicU8::new(HealthLevel::Ok as u8),
        }
    }

    pub fn level(&self) -> HealthLevel {
        HealthLevel::from_u8(self.level.load(Ordering::Acquire))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Classify a write position and return the position to record in the header.
    ///
    /// The first matching threshold sets the level. Below every threshold the
    /// previous level is kept: low fill never heals the broker on its own.
    pub fn evaluate(&self, position: usize) -> usize {
        let (clamped, level) = if position > RECORD_CEILING {
            (RECORD_CEILING, Some(HealthLevel::Overflowed))
        } else if position > self.capacity {
            // A zero capacity wraps everything to the start
            let clamped = position.checked_rem(self.capacity).unwrap_or(0);
            (clamped, Some(HealthLevel::Overloaded))
        } else if position > RECORD_CEILING >> 4 {
            (position, Some(HealthLevel::Degraded))
        } else {
            (position, None)
        };

        if let Some(level) = level {
            if level != self.level() {
                warn!("Broker health changed to {} at write position {}", level, position);
            }
            self.set(level);
        }
        clamped
    }

    /// External reset back to OK
    pub fn reset(&self) {
        self.set(HealthLevel::Ok);
    }

    /// External trigger; never reached from ring buffer fill alone
    pub fn raise_critical(&self) {
        warn!("Broker health raised to critical");
        self.set(HealthLevel::Critical);
    }

    fn set(&self, level: HealthLevel) {
        self.level.store(level as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPACITY: usize = 65532;

    #[test]
    fn test_overflowed_clamps_to_ceiling() {
        let monitor = HealthMonitor::new(CAPACITY);
        assert_eq!(monitor.evaluate(RECORD_CEILING + 1), RECORD_CEILING);
        assert_eq!(monitor.level(), HealthLevel::Overflowed);
    }

    #[test]
    fn test_overloaded_wraps_position() {
        let monitor = HealthMonitor::new(CAPACITY);
        assert_eq!(monitor.evaluate(CAPACITY + 1), 1);
        assert_eq!(monitor.level(), HealthLevel::Overloaded);
    }

    #[test]
    fn test_degraded_without_clamp() {
        // Capacity above the degraded threshold so the overload rule cannot match
        let monitor = HealthMonitor::new(1 << 20);
        let position = (RECORD_CEILING >> 4) + 1;
        assert_eq!(monitor.evaluate(position), position);
        assert_eq!(monitor.level(), HealthLevel::Degraded);
    }

    #[test]
    fn test_low_fill_keeps_previous_level() {
        let monitor = HealthMonitor::new(CAPACITY);
        assert_eq!(monitor.evaluate(100), 100);
        assert_eq!(monitor.level(), HealthLevel::Ok);

        monitor.evaluate(CAPACITY + 10);
        assert_eq!(monitor.level(), HealthLevel::Overloaded);
        monitor.evaluate(10);
        assert_eq!(monitor.level(), HealthLevel::Overloaded);

        monitor.reset();
        assert_eq!(monitor.level(), HealthLevel::Ok);
    }

    #[test]
    fn test_zero_capacity_overloads_without_panicking() {
        let monitor = HealthMonitor::new(0);
        assert_eq!(monitor.evaluate(0), 0);
        assert_eq!(monitor.level(), HealthLevel::Ok);
        assert_eq!(monitor.evaluate(10), 0);
        assert_eq!(monitor.level(), HealthLevel::Overloaded);
    }

    #[test]
    fn test_critical_is_external_only() {
        let monitor = HealthMonitor::new(CAPACITY);
        monitor.raise_critical();
        assert_eq!(monitor.level(), HealthLevel::Critical);
        assert_eq!(monitor.level().to_string(), "critical");
    }
}

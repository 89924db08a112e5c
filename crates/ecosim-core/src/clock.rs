//! Zone calendar.
//!
//! The day counter is the source of truth; the month is always derived
//! from it and never stored. Month 1 covers days 0 to 29.

/// Days in one game month.
pub const DAYS_PER_MONTH: u32 = 30;

/// Game calendar of a single zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneClock {
    day: u32,
    days_per_tick: u32,
}

impl ZoneClock {
    /// A clock at day 0 that moves `days_per_tick` days per tick.
    pub const fn new(days_per_tick: u32) -> Self {
        Self {
            day: 0,
            days_per_tick,
        }
    }

    /// Current day.
    pub const fn day(&self) -> u32 {
        self.day
    }

    /// Current month, `day / 30 + 1`.
    pub const fn current_month(&self) -> u32 {
        self.day
            .saturating_div(DAYS_PER_MONTH)
            .saturating_add(1)
    }

    /// Advance one tick and return the new month.
    pub const fn tick(&mut self) -> u32 {
        self.day = self.day.saturating_add(self.days_per_tick);
        self.current_month()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_is_derived_from_day() {
        let mut clock = ZoneClock::new(10);
        assert_eq!(clock.current_month(), 1);
        clock.tick();
        clock.tick();
        assert_eq!(clock.day(), 20);
        assert_eq!(clock.current_month(), 1);
        assert_eq!(clock.tick(), 2);
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let mut clock = ZoneClock::new(u32::MAX);
        clock.tick();
        clock.tick();
        assert_eq!(clock.day(), u32::MAX);
    }
}

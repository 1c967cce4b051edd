//! Priority lanes.
//!
//! A lane is a single bit; a set of pending priorities is the union of their
//! bits. Lower bits are more urgent, so the highest priority lane of a set is
//! its lowest set bit.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use crate::platform::SchedulerPriority;

/// A set of lanes. A single lane is a `Lanes` with exactly one bit set.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Lanes(u32);

/// Alias used where a value is expected to hold a single lane.
pub type Lane = Lanes;

impl Lanes {
    pub const NO_LANES: Lanes = Lanes(0);
    pub const NO_LANE: Lane = Lanes(0);
    pub const SYNC: Lane = Lanes(0b00001);
    pub const INPUT_CONTINUOUS: Lane = Lanes(0b00010);
    pub const DEFAULT: Lane = Lanes(0b00100);
    pub const TRANSITION: Lane = Lanes(0b01000);
    pub const IDLE: Lane = Lanes(0b10000);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Lanes(bits)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Bitwise union of two lane sets.
    pub const fn merge(self, other: Lanes) -> Lanes {
        Lanes(self.0 | other.0)
    }

    /// The most urgent lane in the set, or [`Lanes::NO_LANE`] for an empty set.
    pub const fn highest_priority(self) -> Lane {
        Lanes(self.0 & self.0.wrapping_neg())
    }

    /// Whether every bit of `subset` is present in `self`.
    ///
    /// The render pass uses this as `render_lane.includes(update_lane)` to
    /// decide whether an update participates. `NO_LANE` is included by every set.
    pub const fn includes(self, subset: Lanes) -> bool {
        self.0 & subset.0 == subset.0
    }

    pub const fn intersects(self, other: Lanes) -> bool {
        self.0 & other.0 != 0
    }

    /// Removes `lanes` from the set.
    pub const fn subtract(self, lanes: Lanes) -> Lanes {
        Lanes(self.0 & !lanes.0)
    }

    /// Scheduler priority used to run work for the highest lane of the set.
    pub fn to_scheduler_priority(self) -> SchedulerPriority {
        let lane = self.highest_priority();
        if lane == Lanes::SYNC {
            SchedulerPriority::Immediate
        } else if lane == Lanes::INPUT_CONTINUOUS {
            SchedulerPriority::UserBlocking
        } else if lane == Lanes::DEFAULT {
            SchedulerPriority::Normal
        } else {
            SchedulerPriority::Idle
        }
    }

    /// Lane assigned to updates requested while the scheduler runs at `priority`.
    pub fn from_scheduler_priority(priority: SchedulerPriority) -> Lane {
        match priority {
            SchedulerPriority::Immediate => Lanes::SYNC,
            SchedulerPriority::UserBlocking => Lanes::INPUT_CONTINUOUS,
            SchedulerPriority::Normal => Lanes::DEFAULT,
            SchedulerPriority::Low | SchedulerPriority::Idle => Lanes::IDLE,
        }
    }
}

pub fn merge_lanes(a: Lanes, b: Lanes) -> Lanes {
    a.merge(b)
}

pub fn get_highest_priority_lane(lanes: Lanes) -> Lane {
    lanes.highest_priority()
}

/// `true` when `subset` qualifies for a render of `set`.
pub fn is_subset_of_lanes(set: Lanes, subset: Lanes) -> bool {
    set.includes(subset)
}

pub fn subtract_lanes(set: Lanes, lanes: Lanes) -> Lanes {
    set.subtract(lanes)
}

impl BitOr for Lanes {
    type Output = Lanes;

    fn bitor(self, rhs: Lanes) -> Lanes {
        self.merge(rhs)
    }
}

impl BitOrAssign for Lanes {
    fn bitor_assign(&mut self, rhs: Lanes) {
        *self = self.merge(rhs);
    }
}

impl BitAnd for Lanes {
    type Output = Lanes;

    fn bitand(self, rhs: Lanes) -> Lanes {
        Lanes(self.0 & rhs.0)
    }
}

impl fmt::Debug for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Lanes, &str); 5] = [
            (Lanes::SYNC, "Sync"),
            (Lanes::INPUT_CONTINUOUS, "InputContinuous"),
            (Lanes::DEFAULT, "Default"),
            (Lanes::TRANSITION, "Transition"),
            (Lanes::IDLE, "Idle"),
        ];
        if self.is_empty() {
            return f.write_str("NoLanes");
        }
        let mut list = f.debug_set();
        for (lane, name) in NAMES {
            if self.includes(lane) {
                list.entry(&format_args!("{name}"));
            }
        }
        let unknown = self.subtract(Lanes(0b11111));
        if !unknown.is_empty() {
            list.entry(&format_args!("{:#b}", unknown.0));
        }
        list.finish()
    }
}

#[cfg(test)]
#[path = "tests/lanes_tests.rs"]
mod tests;

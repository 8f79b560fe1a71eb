//! Routing stage bitset.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Set of routing stages: Flow (mute/unmute), Path (enable/disable) and
/// Configure.
///
/// Used both as the value of the `RoutageState` criterion and as the forced
/// stage a policy engine can request on a route.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RoutingStage(u32);

impl RoutingStage {
    /// No stage.
    pub const NONE: Self = Self(0);
    /// Audio flow (mute/unmute).
    pub const FLOW: Self = Self(1);
    /// Audio path (disable/enable).
    pub const PATH: Self = Self(1 << 1);
    /// Path configuration.
    pub const CONFIGURE: Self = Self(1 << 2);
    /// All stages.
    pub const ALL: Self = Self(0b111);

    /// Raw bit value.
    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Builds a stage set from raw bits, dropping unknown ones.
    #[inline]
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Whether every stage of `other` is set.
    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Whether no stage is set.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Sets or clears the stages of `other`.
    pub fn set(&mut self, other: Self, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl BitOr for RoutingStage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RoutingStage {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for RoutingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names = [
            (Self::FLOW, "Flow"),
            (Self::PATH, "Path"),
            (Self::CONFIGURE, "Configure"),
        ];
        let mut first = true;
        for (stage, name) in names {
            if self.contains(stage) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

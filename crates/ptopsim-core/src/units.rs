//! Units of time, data and rate used throughout the simulator. All of them are thin `u64`
//! wrappers; the simulated clock has nanosecond resolution.

macro_rules! unit {
    ($name: ident) => {
        #[derive(
            Debug,
            Default,
            Copy,
            Clone,
            PartialOrd,
            Ord,
            PartialEq,
            Eq,
            Hash,
            derive_more::Add,
            derive_more::Sub,
            derive_more::AddAssign,
            derive_more::SubAssign,
            derive_more::Sum,
            derive_more::FromStr,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name(u64);

        impl $name {
            pub const ZERO: $name = Self::new(0);
            pub const ONE: $name = Self::new(1);
            pub const MAX: $name = Self::new(u64::MAX);

            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn into_u64(self) -> u64 {
                self.0
            }

            pub fn into_f64(self) -> f64 {
                self.0 as f64
            }

            /// Multiplies the value by `val`, rounding to the nearest integer.
            pub fn scale_by(self, val: f64) -> Self {
                Self((self.0 as f64 * val).round() as u64)
            }

            pub fn saturating_sub(self, other: Self) -> Self {
                Self(self.0.saturating_sub(other.0))
            }
        }
    };
}

macro_rules! display_unit {
    ($name: ident, $suffix: literal) => {
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", self.0, $suffix)
            }
        }
    };
}

macro_rules! scaled_unit {
    ($from: ident => $to: ident, $factor: expr) => {
        impl From<$from> for $to {
            fn from(val: $from) -> Self {
                $to::new(val.into_u64() * $factor)
            }
        }
    };
}

unit!(Nanosecs);
unit!(Microsecs);
unit!(Millisecs);
unit!(Secs);
display_unit!(Nanosecs, "ns");
display_unit!(Microsecs, "us");
display_unit!(Millisecs, "ms");
display_unit!(Secs, "s");
scaled_unit!(Microsecs => Nanosecs, 1_000);
scaled_unit!(Millisecs => Nanosecs, 1_000_000);
scaled_unit!(Secs => Nanosecs, 1_000_000_000);

unit!(Bytes);
unit!(Kilobytes);
display_unit!(Bytes, "B");
display_unit!(Kilobytes, "KB");
scaled_unit!(Kilobytes => Bytes, 1_000);

unit!(BitsPerSec);
unit!(Mbps);
unit!(Gbps);
display_unit!(BitsPerSec, "bps");
display_unit!(Mbps, "Mbps");
display_unit!(Gbps, "Gbps");
scaled_unit!(Mbps => BitsPerSec, 1_000_000);
scaled_unit!(Gbps => BitsPerSec, 1_000_000_000);

impl Bytes {
    pub const fn into_usize(self) -> usize {
        self.0 as usize
    }
}

impl BitsPerSec {
    /// The time it takes to serialize `size` bytes at this rate, rounded up to the next
    /// nanosecond.
    ///
    /// PRECONDITION: the rate is nonzero.
    pub fn length(self, size: Bytes) -> Nanosecs {
        let bits = size.into_u64() as u128 * 8;
        let nanos = (bits * 1_000_000_000 + (self.0 as u128 - 1)) / self.0 as u128;
        Nanosecs::new(nanos.min(u64::MAX as u128) as u64)
    }
}

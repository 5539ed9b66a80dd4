/// Declares an opaque, ordered identifier wrapping an integer. Identifiers print as their
/// inner value so they can be written directly into result files.
macro_rules! identifier {
    ($name: ident, $inner: ty) => {
        #[allow(missing_docs)]
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
            derive_more::Display,
            derive_more::FromStr,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name($inner);

        impl $name {
            /// The first ID.
            pub const ZERO: $name = Self::new(0);

            /// Creates a new ID.
            pub const fn new(val: $inner) -> Self {
                Self(val)
            }

            /// Returns the inner representation of the ID.
            pub const fn inner(self) -> $inner {
                self.0
            }

            /// Returns the ID following this one. Used for sequentially allocated IDs.
            #[allow(unused)]
            pub(crate) const fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }
    };
}

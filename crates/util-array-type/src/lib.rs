// SPDX-License-Identifier: MIT

//! Macros for newtypes over fixed-size byte arrays
//!
//! Hashes, keys and signatures are all `[u8; N]` underneath. Fixed-width
//! numbers (heights, views, peer indices) are stored as big-endian bytes, so
//! that their bincode encoding has a constant size and their byte order
//! matches their numeric order (which matters for database keys).

pub use {blake3, data_encoding, rand};

#[macro_export]
macro_rules! array_type_define {
    (
        $(#[$outer:meta])*
        $v:vis struct $name:tt[$n:expr];
    ) => {

        $(#[$outer])*
        #[derive(PartialOrd, Ord, PartialEq, Eq)]
        $v struct $name([u8; $n]);

        impl $name {

            pub const LEN: usize = $n;
            pub const ZERO: Self = Self([0u8; $n]);
            pub const MAX: Self = Self([0xffu8; $n]);

            pub fn as_slice(&self) -> &[u8] {
                self.0.as_slice()
            }

            pub const fn from_bytes(bytes: [u8; $n]) -> Self {
                Self(bytes)
            }

            pub const fn to_bytes(self) -> [u8; $n] {
                self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $n]
            }
        }
    }
}

#[macro_export]
macro_rules! array_type_impl_bytes_conv {
    ($name:tt) => {
        impl From<[u8; Self::LEN]> for $name {
            fn from(value: [u8; Self::LEN]) -> Self {
                Self(value)
            }
        }
        impl From<$name> for [u8; $name::LEN] {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

/// Conversions from/to [`blake3::Hash`] for 32-byte digest types
#[macro_export]
macro_rules! array_type_impl_blake3_conv {
    ($name:tt) => {
        impl From<$crate::blake3::Hash> for $name {
            fn from(value: $crate::blake3::Hash) -> Self {
                Self(*value.as_bytes())
            }
        }

        impl From<$name> for $crate::blake3::Hash {
            fn from(value: $name) -> Self {
                $crate::blake3::Hash::from_bytes(value.0)
            }
        }
    };
}

#[macro_export]
macro_rules! array_type_impl_zero_default {
    ($name:tt) => {
        impl Default for $name {
            fn default() -> Self {
                Self([0; Self::LEN])
            }
        }
    };
}

#[macro_export]
macro_rules! array_type_impl_debug_as_display {
    ($name:tt) => {
        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                <Self as std::fmt::Display>::fmt(self, f)
            }
        }
    };
}

#[macro_export]
macro_rules! array_type_impl_base32_str {
    (
        $name:tt
    ) => {
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                $crate::data_encoding::BASE32_DNSCURVE.encode_write(self.as_slice(), f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::data_encoding::DecodeError;

            fn from_str(s: &str) -> Result<$name, Self::Err> {
                let v = $crate::data_encoding::BASE32_DNSCURVE.decode(s.as_bytes())?;
                let a = v
                    .try_into()
                    .map_err(|_| $crate::data_encoding::DecodeError {
                        position: 0,
                        kind: $crate::data_encoding::DecodeKind::Length,
                    })?;
                Ok(Self(a))
            }
        }
    };
}

/// Display only the first few bytes, for log-friendly digests
#[macro_export]
macro_rules! array_type_impl_short_display {
    (
        $name:tt, $short:ident
    ) => {
        pub struct $short($name);

        impl $name {
            pub fn to_short(self) -> $short {
                $short(self)
            }
        }

        impl std::fmt::Display for $short {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                $crate::data_encoding::HEXLOWER.encode_write(&self.0.as_slice()[0..4], f)
            }
        }
    };
}

#[macro_export]
macro_rules! array_type_impl_rand {
    (
        $name:tt
    ) => {
        impl $crate::rand::distributions::Distribution<$name>
            for $crate::rand::distributions::Standard
        {
            fn sample<R: $crate::rand::Rng + ?Sized>(&self, rng: &mut R) -> $name {
                $name(rng.r#gen())
            }
        }
    };
}

/// A number stored as fixed-size big-endian bytes
#[macro_export]
macro_rules! array_type_fixed_size_define {
    (
        $(#[$outer:meta])*
        $v:vis struct $name:ident($t:ty);
    ) => {

        $crate::array_type_define! {
            $(#[$outer])*
            $v struct $name[std::mem::size_of::<$t>()];
        }
        $crate::array_type_impl_debug_as_display!($name);
        $crate::array_type_impl_zero_default!($name);

        impl $name {
            pub const fn new(t: $t) -> Self {
                Self(t.to_be_bytes())
            }

            pub const fn to_number(self) -> $t {
                <$t>::from_be_bytes(self.0)
            }
        }

        impl From<$t> for $name {
            fn from(value: $t) -> Self {
                Self(value.to_be_bytes())
            }
        }

        impl From<$name> for $t {
            fn from(value: $name) -> Self {
                <$t>::from_be_bytes(value.0)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_fmt(format_args!("{}", self.to_number()))
            }
        }

        impl $name {
            pub fn next(self) -> Option<Self> {
                self.to_number().checked_add(1).map(Self::from)
            }

            pub fn next_expect(self) -> Self {
                self.next().expect("Can't run out of numbers")
            }

            pub fn prev(self) -> Option<Self> {
                self.to_number().checked_sub(1).map(Self::from)
            }

            pub fn checked_add(self, rhs: $t) -> Option<Self> {
                self.to_number().checked_add(rhs).map(Self::from)
            }

            pub fn saturating_sub(self, rhs: $t) -> Self {
                Self::from(self.to_number().saturating_sub(rhs))
            }
        }
    };
}

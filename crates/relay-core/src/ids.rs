//! Fixed-width identifiers used by the wire protocol.
//!
//! Both the session identifier (`info_hash`) and the peer identifier are
//! 20 opaque bytes on the wire. Internally they display as 40-char hex
//! strings, which is what shows up in logs and errors.

use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

/// Width in bytes of every wire identifier.
pub const ID_LEN: usize = 20;

macro_rules! byte_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; ID_LEN]);

        impl $name {
            pub const fn new(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }

            /// Build from a slice, returning `None` unless it is exactly 20 bytes.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                bytes.try_into().ok().map(Self)
            }

            pub fn as_bytes(&self) -> &[u8; ID_LEN] {
                &self.0
            }

            /// Encode as a wire binary string (one char per byte).
            pub fn to_binary_string(&self) -> String {
                crate::protocol::encoding::bytes_to_binary_string(&self.0)
            }

            /// Decode from a wire binary string.
            pub fn from_binary_string(s: &str) -> Option<Self> {
                crate::protocol::encoding::binary_string_to_bytes(s)
                    .and_then(|bytes| Self::from_slice(&bytes))
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            /// Parse from the 40-char hex form.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut bytes = [0u8; ID_LEN];
                hex::decode_to_slice(s, &mut bytes)?;
                Ok(Self(bytes))
            }
        }

        impl From<[u8; ID_LEN]> for $name {
            fn from(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }
        }
    };
}

byte_id!(
    /// Session identifier naming a swarm.
    InfoHash
);

byte_id!(
    /// Identifier a client chooses for itself within a swarm.
    PeerId
);

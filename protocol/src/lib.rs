//! Wire protocol for the classic block-world server.
//!
//! Everything in this crate is a pure transform: packets are fixed-layout
//! records keyed by a one-byte tag, and the payload size of each tag depends
//! only on the direction of travel and the set of negotiated protocol
//! extensions. The server crate owns all I/O and state.
//!
//! ## Modules
//!
//! - [`codec`]: primitive readers/writers (big-endian integers, padded
//!   strings, fixed-point coordinates, byte angles)
//! - [`packet`]: the [`Packet`] enum, size table, encode and decode
//! - [`extension`]: the capability table and negotiated [`ExtensionSet`]
//! - [`block`]: block ids and custom-block fallbacks
//! - [`level_data`]: compressed world snapshot framing

pub mod block;
pub mod codec;
pub mod error;
pub mod extension;
pub mod level_data;
pub mod packet;

use serde::{Deserialize, Serialize};

pub use block::BlockId;
pub use error::ProtocolError;
pub use extension::{Extension, ExtensionSet};
pub use packet::{Direction, Packet};

/// Protocol version spoken by this server and expected from clients.
pub const PROTOCOL_VERSION: u8 = 7;

/// Magic value in the identification packet marking a client as extension-aware.
pub const CPE_MAGIC: u8 = 0x42;

/// Width of every string field on the wire.
pub const STRING_LENGTH: usize = 64;

/// Entity id a client uses to refer to itself.
pub const SELF_ID: u8 = 255;

/// Application name announced during extension negotiation.
pub const APP_NAME: &str = "voxel-server";

/// A continuous position plus orientation, in block units and degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub yaw: f32,
    pub pitch: f32,
}

impl Location {
    pub fn new(x: f32, y: f32, z: f32, yaw: f32, pitch: f32) -> Self {
        Self {
            x,
            y,
            z,
            yaw,
            pitch,
        }
    }

    /// Quantizes this location to what the wire can express.
    pub fn to_fixed(&self) -> FixedLocation {
        FixedLocation {
            x: codec::to_fixed(self.x),
            y: codec::to_fixed(self.y),
            z: codec::to_fixed(self.z),
            yaw: codec::angle_to_byte(self.yaw),
            pitch: codec::angle_to_byte(self.pitch),
        }
    }

    /// Returns true if both locations quantize to the same wire value.
    pub fn same_on_wire(&self, other: &Location) -> bool {
        self.to_fixed() == other.to_fixed()
    }
}

/// A [`Location`] quantized to wire units (1/32 block, 1/256 turn).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedLocation {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub yaw: u8,
    pub pitch: u8,
}

impl FixedLocation {
    pub fn to_location(&self) -> Location {
        Location {
            x: codec::from_fixed(self.x),
            y: codec::from_fixed(self.y),
            z: codec::from_fixed(self.z),
            yaw: codec::byte_to_angle(self.yaw),
            pitch: codec::byte_to_angle(self.pitch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_location_fixed_roundtrip() {
        let location = Location::new(12.5, 33.0, -4.25, 90.0, 180.0);
        let fixed = location.to_fixed();

        assert_eq!(fixed.x, 400);
        assert_eq!(fixed.y, 1056);
        assert_eq!(fixed.z, -136);
        assert_eq!(fixed.yaw, 64);
        assert_eq!(fixed.pitch, 128);

        let back = fixed.to_location();
        assert_approx_eq!(back.x, 12.5, 0.001);
        assert_approx_eq!(back.z, -4.25, 0.001);
        assert_approx_eq!(back.yaw, 90.0, 0.001);
    }

    #[test]
    fn test_same_on_wire_ignores_sub_unit_noise() {
        let a = Location::new(1.0, 2.0, 3.0, 0.0, 0.0);
        let b = Location::new(1.001, 2.0, 3.0, 0.1, 0.0);
        let c = Location::new(1.5, 2.0, 3.0, 0.0, 0.0);

        assert!(a.same_on_wire(&b));
        assert!(!a.same_on_wire(&c));
    }
}

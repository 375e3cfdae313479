//! Field widths and fixed-point quantization for the object bitstream.
//! Both endpoints must agree on an `ObjectProtocol` before exchanging any
//! state; the widths are not negotiated on the wire.

use crate::bits::sign_extend;
use crate::math::{Quat, Vec3};

/// Quantizes vectors into a packed fixed-point field, one signed
/// two's-complement lane per axis. Signed lanes let the same layout carry
/// zone-local offsets and parent-relative offsets.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PositionLayout {
    bits: [u32; 3],
    scale: f64,
}

impl PositionLayout {
    /// Splits `total_bits` evenly across the three axes. `scale` is the
    /// fixed-point multiplier (quantum = 1/scale world units).
    pub fn new(total_bits: u32, scale: f64) -> PositionLayout {
        if total_bits < 3 || total_bits > 64 {
            panic!("Position width must be in 3..=64, got {}", total_bits);
        }
        if scale <= 0.0 {
            panic!("Position scale must be positive, got {}", scale);
        }

        let axis = total_bits / 3;
        PositionLayout {
            bits: [axis, axis, axis],
            scale,
        }
    }

    #[inline]
    pub fn total_bits(&self) -> u32 {
        self.bits[0] + self.bits[1] + self.bits[2]
    }

    /// Smallest representable step in world units.
    #[inline]
    pub fn quantum(&self) -> f64 {
        1.0 / self.scale
    }

    #[inline]
    fn pack_axis(&self, value: f64, bits: u32) -> u64 {
        let max = (1i64 << (bits - 1)) - 1;
        let min = -(1i64 << (bits - 1));
        let q = (value * self.scale).round() as i64;

        (q.max(min).min(max) as u64) & field_mask(bits)
    }

    pub fn pack(&self, v: Vec3) -> u64 {
        let x = self.pack_axis(v.x, self.bits[0]);
        let y = self.pack_axis(v.y, self.bits[1]);
        let z = self.pack_axis(v.z, self.bits[2]);

        (x << (self.bits[1] + self.bits[2])) | (y << self.bits[2]) | z
    }

    pub fn unpack(&self, packed: u64) -> Vec3 {
        let z = packed & field_mask(self.bits[2]);
        let y = (packed >> self.bits[2]) & field_mask(self.bits[1]);
        let x = (packed >> (self.bits[1] + self.bits[2])) & field_mask(self.bits[0]);

        Vec3::new(
            sign_extend(x, self.bits[0]) as f64 / self.scale,
            sign_extend(y, self.bits[1]) as f64 / self.scale,
            sign_extend(z, self.bits[2]) as f64 / self.scale,
        )
    }
}

/// Quantizes unit quaternions as four signed fixed-point lanes in [-1, 1].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RotationLayout {
    component_bits: u32,
}

impl RotationLayout {
    pub fn new(total_bits: u32) -> RotationLayout {
        if total_bits < 4 || total_bits > 64 {
            panic!("Rotation width must be in 4..=64, got {}", total_bits);
        }

        RotationLayout {
            component_bits: total_bits / 4,
        }
    }

    #[inline]
    pub fn total_bits(&self) -> u32 {
        self.component_bits * 4
    }

    #[inline]
    fn scale(&self) -> f64 {
        ((1i64 << (self.component_bits - 1)) - 1) as f64
    }

    #[inline]
    fn pack_component(&self, value: f64) -> u64 {
        let scale = self.scale();
        let q = (value.max(-1.0).min(1.0) * scale).round() as i64;

        (q as u64) & field_mask(self.component_bits)
    }

    pub fn pack(&self, q: Quat) -> u64 {
        let b = self.component_bits;
        (self.pack_component(q.x) << (3 * b))
            | (self.pack_component(q.y) << (2 * b))
            | (self.pack_component(q.z) << b)
            | self.pack_component(q.w)
    }

    pub fn unpack(&self, packed: u64) -> Quat {
        let b = self.component_bits;
        let scale = self.scale();
        let lane = |shift: u32| sign_extend((packed >> shift) & field_mask(b), b) as f64 / scale;

        Quat::new(lane(3 * b), lane(2 * b), lane(b), lane(0))
    }
}

/// The agreed shape of every ObjectState on the wire.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ObjectProtocol {
    pub zone_id_bits: u32,
    pub id_bits: u32,
    pub position: PositionLayout,
    pub rotation: RotationLayout,
}

impl ObjectProtocol {
    pub fn new(
        zone_id_bits: u32,
        id_bits: u32,
        position: PositionLayout,
        rotation: RotationLayout,
    ) -> ObjectProtocol {
        if zone_id_bits == 0 || zone_id_bits > 32 {
            panic!("Zone id width must be in 1..=32, got {}", zone_id_bits);
        }
        if id_bits == 0 || id_bits > 64 {
            panic!("Id width must be in 1..=64, got {}", id_bits);
        }

        ObjectProtocol {
            zone_id_bits,
            id_bits,
            position,
            rotation,
        }
    }
}

#[inline]
fn field_mask(bits: u32) -> u64 {
    match bits {
        64 => u64::max_value(),
        _ => (1u64 << bits) - 1,
    }
}

use crate::bits::sign_extend;
use crate::math::Vec3;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

const AXIS_BITS: u32 = 21;
const AXIS_MASK: u64 = (1 << AXIS_BITS) - 1;

/// Immutable description of the world partitioning. Cell sizes are integer
/// world units per axis; a size of 0 flattens that axis into a single
/// infinite slab.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ZoneGrid {
    pub cell: [i64; 3],
}

impl ZoneGrid {
    #[inline]
    pub fn new(x: i64, y: i64, z: i64) -> ZoneGrid {
        ZoneGrid { cell: [x, y, z] }
    }

    #[inline]
    pub fn uniform(size: i64) -> ZoneGrid {
        ZoneGrid::new(size, size, size)
    }

    /// Floor division of a world coordinate into a cell coordinate.
    /// Flattened axes always map to cell 0.
    #[inline]
    pub fn world_to_zone(d: f64, size: i64) -> i64 {
        if size == 0 {
            0
        } else {
            (d / size as f64).floor() as i64
        }
    }

    /// The cell containing the supplied world position.
    #[inline]
    pub fn world_key(&self, p: Vec3) -> ZoneKey {
        self.key(
            Self::world_to_zone(p.x, self.cell[0]),
            Self::world_to_zone(p.y, self.cell[1]),
            Self::world_to_zone(p.z, self.cell[2]),
        )
    }

    /// The cell at the supplied integer coordinates.
    #[inline]
    pub fn key(&self, x: i64, y: i64, z: i64) -> ZoneKey {
        ZoneKey {
            grid: *self,
            x,
            y,
            z,
            origin: Vec3::new(
                (x * self.cell[0]) as f64,
                (y * self.cell[1]) as f64,
                (z * self.cell[2]) as f64,
            ),
        }
    }

    /// Decodes a 63-bit long id produced by `ZoneKey::to_long_id`.
    #[inline]
    pub fn from_long_id(&self, id: u64) -> ZoneKey {
        self.key(
            sign_extend((id >> (2 * AXIS_BITS)) & AXIS_MASK, AXIS_BITS),
            sign_extend((id >> AXIS_BITS) & AXIS_MASK, AXIS_BITS),
            sign_extend(id & AXIS_MASK, AXIS_BITS),
        )
    }
}

/// A specific cell of a specific grid, with its world origin precomputed.
/// Equality and hashing go by grid and coordinates only.
#[derive(Debug, Copy, Clone)]
pub struct ZoneKey {
    pub grid: ZoneGrid,
    pub x: i64,
    pub y: i64,
    pub z: i64,
    origin: Vec3,
}

impl ZoneKey {
    /// World position of this cell's minimum corner.
    #[inline]
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Packs the coordinates into a 63-bit id: three sign-extended 21-bit
    /// fields, `x << 42 | y << 21 | z`.
    #[inline]
    pub fn to_long_id(&self) -> u64 {
        ((self.x as u64 & AXIS_MASK) << (2 * AXIS_BITS))
            | ((self.y as u64 & AXIS_MASK) << AXIS_BITS)
            | (self.z as u64 & AXIS_MASK)
    }

    /// World position into this cell's local coordinates; this is the form
    /// quantized into position bits.
    #[inline]
    pub fn to_local(&self, world: Vec3) -> Vec3 {
        world - self.origin
    }

    /// Inverse of `to_local`.
    #[inline]
    pub fn to_world(&self, local: Vec3) -> Vec3 {
        local + self.origin
    }
}

impl PartialEq for ZoneKey {
    #[inline]
    fn eq(&self, other: &ZoneKey) -> bool {
        self.grid == other.grid && self.x == other.x && self.y == other.y && self.z == other.z
    }
}

impl Eq for ZoneKey {}

impl Hash for ZoneKey {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.grid.hash(state);
        self.x.hash(state);
        self.y.hash(state);
        self.z.hash(state);
    }
}

impl fmt::Display for ZoneKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Zone({}, {}, {})", self.x, self.y, self.z)
    }
}

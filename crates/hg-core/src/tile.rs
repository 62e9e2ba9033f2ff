//! Quadtree tile addressing.
//!
//! A tile at `level` L covers `1 / 2^L` of the root extent on each axis.
//! Tile `(0, 0)` sits at the minimum corner of the root bounds.

use core::fmt;

use crate::geom::{Bounds, Real, pt};
use crate::{HgError, HgResult};

/// Deepest supported quadtree level (keeps `2^level` inside `u32`).
pub const MAX_LEVEL: u8 = 31;

/// Identity of one terrain tile.
///
/// Ordering is by level, then `tx`, then `ty`, which gives a deterministic
/// iteration order for caches keyed by tiles. Deserialization goes through
/// [`TileKey::new`], so out-of-range keys are rejected there too.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "RawTileKey")
)]
pub struct TileKey {
    level: u8,
    tx: u32,
    ty: u32,
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawTileKey {
    level: u8,
    tx: u32,
    ty: u32,
}

#[cfg(feature = "serde")]
impl TryFrom<RawTileKey> for TileKey {
    type Error = HgError;

    fn try_from(raw: RawTileKey) -> HgResult<Self> {
        TileKey::new(raw.level, raw.tx, raw.ty)
    }
}

impl TileKey {
    /// Create a tile key, checking that the coordinates exist at `level`.
    pub fn new(level: u8, tx: u32, ty: u32) -> HgResult<Self> {
        if level > MAX_LEVEL {
            return Err(HgError::InvalidArg {
                what: "tile level exceeds MAX_LEVEL",
            });
        }
        let side = Self::side(level);
        if u64::from(tx) >= side || u64::from(ty) >= side {
            return Err(HgError::InvalidArg {
                what: "tile coordinate outside level extent",
            });
        }
        Ok(Self { level, tx, ty })
    }

    /// The single tile at level 0.
    pub fn root() -> Self {
        Self {
            level: 0,
            tx: 0,
            ty: 0,
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn tx(&self) -> u32 {
        self.tx
    }

    pub fn ty(&self) -> u32 {
        self.ty
    }

    /// Number of tiles along one axis at `level`. `level` must not exceed
    /// [`MAX_LEVEL`].
    pub fn side(level: u8) -> u64 {
        1_u64 << level
    }

    /// Parent tile, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.level == 0 {
            return None;
        }
        Some(Self {
            level: self.level - 1,
            tx: self.tx / 2,
            ty: self.ty / 2,
        })
    }

    /// The four children in (tx, ty) order: SW, SE, NW, NE.
    pub fn children(&self) -> HgResult<[Self; 4]> {
        if self.level >= MAX_LEVEL {
            return Err(HgError::InvalidArg {
                what: "tile at MAX_LEVEL has no children",
            });
        }
        let level = self.level + 1;
        let (x, y) = (self.tx * 2, self.ty * 2);
        Ok([
            Self { level, tx: x, ty: y },
            Self {
                level,
                tx: x + 1,
                ty: y,
            },
            Self {
                level,
                tx: x,
                ty: y + 1,
            },
            Self {
                level,
                tx: x + 1,
                ty: y + 1,
            },
        ])
    }

    /// True if `other` is this tile or one of its descendants.
    pub fn contains(&self, other: &TileKey) -> bool {
        if other.level < self.level {
            return false;
        }
        let shift = other.level - self.level;
        (other.tx >> shift) == self.tx && (other.ty >> shift) == self.ty
    }

    /// Same-level neighbour offset by `(dx, dy)`, if it exists.
    pub fn neighbor(&self, dx: i64, dy: i64) -> Option<Self> {
        let side = Self::side(self.level) as i64;
        let x = i64::from(self.tx) + dx;
        let y = i64::from(self.ty) + dy;
        if !(0..side).contains(&x) || !(0..side).contains(&y) {
            return None;
        }
        Some(Self {
            level: self.level,
            tx: x as u32,
            ty: y as u32,
        })
    }

    /// Extent of this tile when the root tile spans `[0, root_size]^2`.
    pub fn bounds(&self, root_size: Real) -> Bounds {
        let size = root_size / Self::side(self.level) as Real;
        let x0 = Real::from(self.tx) * size;
        let y0 = Real::from(self.ty) * size;
        Bounds::new(pt(x0, y0), pt(x0 + size, y0 + size))
    }

    /// Compact value derived from the key, used to seed deterministic generators.
    pub fn seed(&self) -> u64 {
        (u64::from(self.level) << 58) ^ (u64::from(self.tx) << 29) ^ u64::from(self.ty)
    }
}

impl fmt::Debug for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TileKey({}/{}/{})", self.level, self.tx, self.ty)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.tx, self.ty)
    }
}


#[cfg(all(test, feature = "serde"))]
mod serde_tests {
    use super::*;

    #[test]
    fn deserialize_checks_range() {
        let key: TileKey = serde_json::from_str(r#"{"level":2,"tx":3,"ty":1}"#).unwrap();
        assert_eq!(key, TileKey::new(2, 3, 1).unwrap());

        let err = serde_json::from_str::<TileKey>(r#"{"level":2,"tx":9,"ty":0}"#).unwrap_err();
        assert!(err.to_string().contains("tile coordinate outside level extent"));
        assert!(serde_json::from_str::<TileKey>(r#"{"level":200,"tx":0,"ty":0}"#).is_err());
    }

    #[test]
    fn serialized_key_reads_back() {
        let key = TileKey::new(7, 100, 27).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"{"level":7,"tx":100,"ty":27}"#);
        assert_eq!(serde_json::from_str::<TileKey>(&json).unwrap(), key);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn any_tile() -> impl Strategy<Value = TileKey> {
        (0_u8..20).prop_flat_map(|level| {
            let side = TileKey::side(level) as u32;
            (Just(level), 0..side, 0..side)
                .prop_map(|(level, tx, ty)| TileKey::new(level, tx, ty).unwrap())
        })
    }

    proptest! {
        #[test]
        fn children_round_trip_to_parent(tile in any_tile()) {
            for child in tile.children().unwrap() {
                prop_assert_eq!(child.parent(), Some(tile));
                prop_assert!(tile.contains(&child));
            }
        }

        #[test]
        fn children_tile_parent_bounds(tile in any_tile()) {
            let parent = tile.bounds(1024.0);
            let mut covered = 0.0;
            for child in tile.children().unwrap() {
                let b = child.bounds(1024.0);
                prop_assert!(parent.contains(&b.min) && parent.contains(&b.max));
                covered += b.width() * b.height();
            }
            let area = parent.width() * parent.height();
            prop_assert!((covered - area).abs() <= area * 1e-9);
        }

        #[test]
        fn root_contains_everything(tile in any_tile()) {
            prop_assert!(TileKey::root().contains(&tile));
        }
    }
}

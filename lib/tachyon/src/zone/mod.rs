//! Spatial partitioning: the grid, per-cell history, object range
//! tracking, the cross-cell frame lifecycle, and the per-client window.

pub mod grid;
pub mod history;
pub mod manager;
pub mod range;
pub mod window;

pub use self::grid::{ZoneGrid, ZoneKey};
pub use self::history::{StateBlock, StateEntry, WarpEntry, Zone};
pub use self::manager::{StateFrame, ZoneManager};
pub use self::range::{CellBox, ZoneRange};
pub use self::window::LocalZoneIndex;

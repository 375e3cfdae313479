use crate::error::ProtocolResult;
use crate::protocol::{ObjectProtocol, PositionLayout, RotationLayout};
use crate::zone::grid::ZoneGrid;
use serde_derive::{Deserialize, Serialize};
use std::io;
use std::path::Path;

pub const DEFAULT_CELL_SIZE: i64 = 32;
pub const DEFAULT_MTU: usize = 1500;

/// Fixed per-datagram overheads subtracted from the MTU: UDP/IP headers
/// plus the transport's own framing.
pub const UDP_OVERHEAD: usize = 50;
pub const FRAMING_OVERHEAD: usize = 5;

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct GridSettings {
    pub cell: [i64; 3],
}

impl Default for GridSettings {
    fn default() -> GridSettings {
        GridSettings {
            cell: [DEFAULT_CELL_SIZE; 3],
        }
    }
}

impl GridSettings {
    #[inline]
    pub fn grid(&self) -> ZoneGrid {
        ZoneGrid {
            cell: self.cell,
        }
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct ProtocolSettings {
    pub zone_id_bits: u32,
    pub id_bits: u32,
    pub position_bits: u32,
    pub rotation_bits: u32,
    /// Fixed-point multiplier for position lanes; the default resolves a
    /// 32-unit cell into quarter units at 8 bits per axis.
    pub position_scale: f64,
}

impl Default for ProtocolSettings {
    fn default() -> ProtocolSettings {
        ProtocolSettings {
            zone_id_bits: 8,
            id_bits: 64,
            position_bits: 24,
            rotation_bits: 12,
            position_scale: 4.0,
        }
    }
}

impl ProtocolSettings {
    pub fn protocol(&self) -> ObjectProtocol {
        ObjectProtocol::new(
            self.zone_id_bits,
            self.id_bits,
            PositionLayout::new(self.position_bits, self.position_scale),
            RotationLayout::new(self.rotation_bits),
        )
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct ZoneSettings {
    /// Committed frames each zone retains between purges.
    pub history_backlog: usize,
    /// Window radius in cells around each client's avatar.
    pub window_radius: i64,
    /// Use the unbounded range tracker; the compact two-cell variant is
    /// kept for objects guaranteed small.
    pub dynamic_ranges: bool,
}

impl Default for ZoneSettings {
    fn default() -> ZoneSettings {
        ZoneSettings {
            history_backlog: 12,
            window_radius: 1,
            dynamic_ranges: true,
        }
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Target interval between purge ticks, milliseconds.
    pub collection_period_ms: u64,
    /// Sleep between readiness checks, milliseconds; -1 busy-waits.
    pub idle_sleep_ms: i64,
}

impl Default for CollectorSettings {
    fn default() -> CollectorSettings {
        CollectorSettings {
            collection_period_ms: 50,
            idle_sleep_ms: 1,
        }
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct WriterSettings {
    pub mtu: usize,
    /// Receive-side interpolation bias, nanoseconds (negative pushes the
    /// client's view of server time into the past).
    pub clock_offset_nanos: i64,
}

impl Default for WriterSettings {
    fn default() -> WriterSettings {
        WriterSettings {
            mtu: DEFAULT_MTU,
            clock_offset_nanos: -100_000_000,
        }
    }
}

impl WriterSettings {
    /// Usable datagram payload in bytes after fixed overheads.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        if self.mtu <= UDP_OVERHEAD + FRAMING_OVERHEAD {
            panic!("MTU of {} leaves no payload after overheads", self.mtu);
        }

        self.mtu - UDP_OVERHEAD - FRAMING_OVERHEAD
    }

    /// A settings instance sized so the payload budget is exactly
    /// `bytes`. Used where the datagram size is dictated from outside.
    #[inline]
    pub fn with_message_size(bytes: usize) -> WriterSettings {
        WriterSettings {
            mtu: bytes + UDP_OVERHEAD + FRAMING_OVERHEAD,
            ..WriterSettings::default()
        }
    }
}

#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationSettings {
    pub grid: GridSettings,
    pub protocol: ProtocolSettings,
    pub zones: ZoneSettings,
    pub collector: CollectorSettings,
    pub writer: WriterSettings,
}

impl ReplicationSettings {
    pub fn load<P: AsRef<Path>>(path: P) -> ProtocolResult<ReplicationSettings> {
        serdeconv::from_toml_file(path)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()).into())
    }
}

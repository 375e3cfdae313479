use crate::bits::{BitReader, BitWriter};
use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::ObjectProtocol;
use std::io::{Read, Write};

/// Local zone id literal meaning "removed from the window".
pub const ZONE_REMOVED: u32 = 0;

/// A wire-level snapshot or delta of one object. Absent fields mean "same
/// as the baseline"; a state with every field absent is the keepalive form.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectState {
    /// Nonzero in every valid state; 0 is the "no state" sentinel on the
    /// wire and cannot be serialized.
    pub network_id: u16,
    /// Local window zone id. `Some(0)` is the removal sentinel.
    pub zone_id: Option<u32>,
    /// Application entity id, up to `id_bits` wide.
    pub real_id: Option<u64>,
    /// Application id of the parent entity, same width as `real_id`.
    pub parent_id: Option<u64>,
    /// Quantized zone-local (or parent-relative) position field.
    pub position: Option<u64>,
    /// Quantized rotation field.
    pub rotation: Option<u64>,
}

impl ObjectState {
    #[inline]
    pub fn new(network_id: u16) -> ObjectState {
        ObjectState {
            network_id,
            ..ObjectState::default()
        }
    }

    /// True once this state carries the removal sentinel.
    #[inline]
    pub fn is_removed(&self) -> bool {
        self.zone_id == Some(ZONE_REMOVED)
    }

    #[inline]
    pub fn mark_removed(&mut self) {
        self.zone_id = Some(ZONE_REMOVED);
    }

    /// Exact size of this state on the wire, in bits.
    pub fn bit_size(&self, protocol: &ObjectProtocol) -> u64 {
        let mut bits = 16 + 5;

        if self.zone_id.is_some() {
            bits += u64::from(protocol.zone_id_bits);
        }
        if self.real_id.is_some() {
            bits += u64::from(protocol.id_bits);
        }
        if self.parent_id.is_some() {
            bits += u64::from(protocol.id_bits);
        }
        if self.position.is_some() {
            bits += u64::from(protocol.position.total_bits());
        }
        if self.rotation.is_some() {
            bits += u64::from(protocol.rotation.total_bits());
        }

        bits
    }

    /// Copies every present field of `delta` over this state. Absent
    /// fields are left untouched.
    pub fn apply_delta(&mut self, delta: &ObjectState) {
        self.network_id = delta.network_id;

        if let Some(zone_id) = delta.zone_id {
            self.zone_id = Some(zone_id);
        }
        if let Some(real_id) = delta.real_id {
            self.real_id = Some(real_id);
        }
        if let Some(parent_id) = delta.parent_id {
            self.parent_id = Some(parent_id);
        }
        if let Some(position) = delta.position {
            self.position = Some(position);
        }
        if let Some(rotation) = delta.rotation {
            self.rotation = Some(rotation);
        }
    }

    /// Constructs the delta carrying only the fields on which this state
    /// differs from `baseline`.
    pub fn delta_from(&self, baseline: &ObjectState) -> ObjectState {
        ObjectState {
            network_id: self.network_id,
            zone_id: diff(self.zone_id, baseline.zone_id),
            real_id: diff(self.real_id, baseline.real_id),
            parent_id: diff(self.parent_id, baseline.parent_id),
            position: diff(self.position, baseline.position),
            rotation: diff(self.rotation, baseline.rotation),
        }
    }

    pub fn write<W: Write>(
        &self,
        writer: &mut BitWriter<W>,
        protocol: &ObjectProtocol,
    ) -> ProtocolResult<()> {
        if self.network_id == 0 {
            return Err(ProtocolError::EmptyState);
        }

        writer.write_bits(u32::from(self.network_id), 16)?;

        write_field(writer, self.zone_id.map(u64::from), protocol.zone_id_bits)?;
        write_field(writer, self.real_id, protocol.id_bits)?;
        write_field(writer, self.parent_id, protocol.id_bits)?;
        write_field(writer, self.position, protocol.position.total_bits())?;
        write_field(writer, self.rotation, protocol.rotation.total_bits())?;

        Ok(())
    }

    /// Reads one state; a zero network id on the wire decodes to `None`.
    pub fn read<R: Read>(
        reader: &mut BitReader<R>,
        protocol: &ObjectProtocol,
    ) -> ProtocolResult<Option<ObjectState>> {
        let network_id = reader.read_bits(16)? as u16;

        if network_id == 0 {
            return Ok(None);
        }

        let zone_id = read_field(reader, protocol.zone_id_bits)?.map(|v| v as u32);
        let real_id = read_field(reader, protocol.id_bits)?;
        let parent_id = read_field(reader, protocol.id_bits)?;
        let position = read_field(reader, protocol.position.total_bits())?;
        let rotation = read_field(reader, protocol.rotation.total_bits())?;

        Ok(Some(ObjectState {
            network_id,
            zone_id,
            real_id,
            parent_id,
            position,
            rotation,
        }))
    }
}

#[inline]
fn diff<T: PartialEq + Copy>(current: Option<T>, baseline: Option<T>) -> Option<T> {
    match current {
        Some(value) if baseline != Some(value) => Some(value),
        _ => None,
    }
}

#[inline]
fn write_field<W: Write>(
    writer: &mut BitWriter<W>,
    field: Option<u64>,
    bits: u32,
) -> ProtocolResult<()> {
    match field {
        Some(value) => {
            writer.write_bit(true)?;
            writer.write_long_bits(value, bits)?;
        }
        None => writer.write_bit(false)?,
    }

    Ok(())
}

#[inline]
fn read_field<R: Read>(reader: &mut BitReader<R>, bits: u32) -> ProtocolResult<Option<u64>> {
    match reader.read_bit()? {
        true => Ok(Some(reader.read_long_bits(bits)?)),
        false => Ok(None),
    }
}

//! Packed per-slot particle state
//!
//! One fixed-stride record per slot: position, velocity, scale, remaining
//! lifetime and a flag word. Records are plain old data so the whole buffer
//! can be viewed as bytes without copying.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use ember_core::Vec3;

/// Number of 4-byte fields in one record
pub const RECORD_STRIDE: usize = 9;

bitflags! {
    /// Per-slot state bits.
    ///
    /// Invariants: `SPAWNED` is set iff the slot's entity is spawned in the
    /// host world, and `SLEEPING` is only ever set together with `SPAWNED`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParticleFlags: u32 {
        const SPAWNED = 1 << 0;
        const SLEEPING = 1 << 1;
        const RESERVED_0 = 1 << 2;
        const RESERVED_1 = 1 << 3;
    }
}

/// One slot's record, laid out exactly as stored
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ParticleRecord {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub scale: f32,
    /// Remaining lifetime in seconds
    pub lifetime: f32,
    pub flags: u32,
}

impl ParticleRecord {
    pub fn flags(&self) -> ParticleFlags {
        ParticleFlags::from_bits_retain(self.flags)
    }
}

/// A partial write to one slot; only `Some` fields are applied
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlotUpdate {
    pub slot: usize,
    pub position: Option<Vec3>,
    pub velocity: Option<Vec3>,
    pub scale: Option<f32>,
    pub lifetime: Option<f32>,
    pub flags: Option<ParticleFlags>,
}

impl SlotUpdate {
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            ..Default::default()
        }
    }
}

/// Fixed-capacity record store indexed by slot.
///
/// Indexing past `capacity()` is a caller bug and panics rather than
/// touching a neighbouring record.
pub struct ParticleDataBuffer {
    records: Vec<ParticleRecord>,
}

impl ParticleDataBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: vec![ParticleRecord::default(); capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    #[inline]
    fn record_mut(&mut self, slot: usize) -> &mut ParticleRecord {
        let capacity = self.records.len();
        assert!(slot < capacity, "slot {slot} out of range (capacity {capacity})");
        &mut self.records[slot]
    }

    #[inline]
    pub fn record(&self, slot: usize) -> &ParticleRecord {
        let capacity = self.records.len();
        assert!(slot < capacity, "slot {slot} out of range (capacity {capacity})");
        &self.records[slot]
    }

    pub fn position(&self, slot: usize) -> Vec3 {
        Vec3::from_array(self.record(slot).position)
    }

    pub fn set_position(&mut self, slot: usize, position: Vec3) {
        self.record_mut(slot).position = position.to_array();
    }

    pub fn velocity(&self, slot: usize) -> Vec3 {
        Vec3::from_array(self.record(slot).velocity)
    }

    pub fn set_velocity(&mut self, slot: usize, velocity: Vec3) {
        self.record_mut(slot).velocity = velocity.to_array();
    }

    pub fn scale(&self, slot: usize) -> f32 {
        self.record(slot).scale
    }

    pub fn set_scale(&mut self, slot: usize, scale: f32) {
        self.record_mut(slot).scale = scale;
    }

    pub fn lifetime(&self, slot: usize) -> f32 {
        self.record(slot).lifetime
    }

    pub fn set_lifetime(&mut self, slot: usize, lifetime: f32) {
        self.record_mut(slot).lifetime = lifetime;
    }

    pub fn flags(&self, slot: usize) -> ParticleFlags {
        self.record(slot).flags()
    }

    pub fn set_flags(&mut self, slot: usize, flags: ParticleFlags) {
        self.record_mut(slot).flags = flags.bits();
    }

    pub fn has_flag(&self, slot: usize, flag: ParticleFlags) -> bool {
        self.flags(slot).contains(flag)
    }

    /// Apply a batch of partial writes in order
    pub fn update_many(&mut self, updates: &[SlotUpdate]) {
        for update in updates {
            let record = self.record_mut(update.slot);
            if let Some(p) = update.position {
                record.position = p.to_array();
            }
            if let Some(v) = update.velocity {
                record.velocity = v.to_array();
            }
            if let Some(s) = update.scale {
                record.scale = s;
            }
            if let Some(l) = update.lifetime {
                record.lifetime = l;
            }
            if let Some(f) = update.flags {
                record.flags = f.bits();
            }
        }
    }

    /// Change capacity, keeping every record below `min(old, new)` intact.
    /// New slots start zeroed.
    pub fn resize(&mut self, new_capacity: usize) {
        let mut records = vec![ParticleRecord::default(); new_capacity];
        let keep = self.records.len().min(new_capacity);
        records[..keep].copy_from_slice(&self.records[..keep]);
        self.records = records;
    }

    /// Zero every record
    pub fn clear(&mut self) {
        self.records.fill(ParticleRecord::default());
    }

    /// Release the backing storage; capacity becomes zero
    pub fn dispose(&mut self) {
        self.records = Vec::new();
    }

    /// Raw record bytes, e.g. for upload or snapshotting
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.records.as_slice())
    }

    pub fn byte_len(&self) -> usize {
        std::mem::size_of_val(self.records.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn record_layout() {
        assert_eq!(std::mem::size_of::<ParticleRecord>(), RECORD_STRIDE * 4);
        assert_eq!(std::mem::align_of::<ParticleRecord>(), 4);
    }

    #[test]
    fn field_accessors_round_trip() {
        let mut buffer = ParticleDataBuffer::new(4);
        buffer.set_position(2, Vec3::new(1.0, 2.0, 3.0));
        buffer.set_velocity(2, Vec3::new(-1.0, 0.5, 0.0));
        buffer.set_scale(2, 0.25);
        buffer.set_lifetime(2, 1.5);
        buffer.set_flags(2, ParticleFlags::SPAWNED | ParticleFlags::SLEEPING);

        assert_eq!(buffer.position(2), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(buffer.velocity(2), Vec3::new(-1.0, 0.5, 0.0));
        assert_eq!(buffer.scale(2), 0.25);
        assert_eq!(buffer.lifetime(2), 1.5);
        assert!(buffer.has_flag(2, ParticleFlags::SLEEPING));
        // Neighbours untouched
        assert_eq!(*buffer.record(1), ParticleRecord::default());
        assert_eq!(*buffer.record(3), ParticleRecord::default());
    }

    #[test]
    fn update_many_writes_only_supplied_fields() {
        let mut buffer = ParticleDataBuffer::new(2);
        buffer.set_scale(0, 2.0);
        buffer.set_lifetime(0, 3.0);

        let update = SlotUpdate {
            position: Some(Vec3::new(5.0, 0.0, 0.0)),
            lifetime: Some(2.5),
            ..SlotUpdate::new(0)
        };
        buffer.update_many(&[update]);

        assert_eq!(buffer.position(0), Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(buffer.lifetime(0), 2.5);
        assert_eq!(buffer.scale(0), 2.0);
        assert_eq!(buffer.velocity(0), Vec3::ZERO);
    }

    #[test]
    fn clear_and_dispose() {
        let mut buffer = ParticleDataBuffer::new(3);
        buffer.set_flags(1, ParticleFlags::SPAWNED);
        buffer.clear();
        assert_eq!(buffer.flags(1), ParticleFlags::empty());
        assert_eq!(buffer.capacity(), 3);
        assert_eq!(buffer.byte_len(), 3 * 36);
        assert_eq!(buffer.as_bytes().len(), buffer.byte_len());

        buffer.dispose();
        assert_eq!(buffer.capacity(), 0);
        assert_eq!(buffer.byte_len(), 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_access_panics() {
        let buffer = ParticleDataBuffer::new(2);
        let _ = buffer.position(2);
    }

    proptest! {
        #[test]
        fn resize_preserves_overlapping_prefix(
            old_cap in 0usize..64,
            new_cap in 0usize..64,
            seed in any::<u32>(),
        ) {
            let mut buffer = ParticleDataBuffer::new(old_cap);
            for slot in 0..old_cap {
                let v = (seed as f32) * 1e-6 + slot as f32;
                buffer.set_position(slot, Vec3::new(v, -v, v * 2.0));
                buffer.set_velocity(slot, Vec3::new(v + 1.0, 0.0, -1.0));
                buffer.set_scale(slot, v * 0.5);
                buffer.set_lifetime(slot, v + 3.0);
                buffer.set_flags(slot, ParticleFlags::from_bits_retain(slot as u32 & 0b11));
            }
            let before: Vec<ParticleRecord> =
                (0..old_cap).map(|s| *buffer.record(s)).collect();

            buffer.resize(new_cap);

            prop_assert_eq!(buffer.capacity(), new_cap);
            for slot in 0..old_cap.min(new_cap) {
                prop_assert_eq!(*buffer.record(slot), before[slot]);
            }
            for slot in old_cap.min(new_cap)..new_cap {
                prop_assert_eq!(*buffer.record(slot), ParticleRecord::default());
            }
        }
    }
}

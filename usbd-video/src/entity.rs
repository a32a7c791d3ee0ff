//! # Video Function Topology
//!
//! Terminals and units addressable through the high byte of `wIndex` on
//! the video control interface. The table is filled once at interface
//! initialisation and only read afterwards.

use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capacity of a bus's entity table
pub const MAX_ENTITIES: usize = 8;

/// Camera sensor input terminal type (ITT_CAMERA)
pub const ITT_CAMERA: u16 = 0x0201;

/// USB streaming terminal type (TT_STREAMING)
pub const TT_STREAMING: u16 = 0x0101;

/// Entity kinds, keyed by their video control descriptor subtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum EntityKind {
    InputTerminal = 0x02,
    OutputTerminal = 0x03,
    SelectorUnit = 0x04,
    ProcessingUnit = 0x05,
    ExtensionUnit = 0x06,
    EncodingUnit = 0x07,
}

/// One addressable terminal or unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EntityDescriptor {
    /// bTerminalID / bUnitID
    pub id: u8,
    pub kind: EntityKind,
    /// wTerminalType; zero for units
    pub terminal_type: u16,
}

impl EntityDescriptor {
    pub const fn camera(id: u8) -> Self {
        Self { id, kind: EntityKind::InputTerminal, terminal_type: ITT_CAMERA }
    }

    pub const fn output(id: u8, terminal_type: u16) -> Self {
        Self { id, kind: EntityKind::OutputTerminal, terminal_type }
    }

    pub const fn unit(id: u8, kind: EntityKind) -> Self {
        Self { id, kind, terminal_type: 0 }
    }

    /// Input terminal backed by a camera sensor
    pub fn is_camera(&self) -> bool {
        self.kind == EntityKind::InputTerminal && self.terminal_type == ITT_CAMERA
    }
}

/// Default topology: camera → processing unit → streaming output
pub const DEFAULT_ENTITIES: [EntityDescriptor; 3] = [
    EntityDescriptor::camera(0x01),
    EntityDescriptor::output(0x03, TT_STREAMING),
    EntityDescriptor::unit(0x02, EntityKind::ProcessingUnit),
];

/// Errors while building an entity table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EntityError {
    /// More than `MAX_ENTITIES` descriptors
    #[error("entity table full")]
    Full,
    /// Two descriptors share an id
    #[error("duplicate entity id {id}")]
    DuplicateId { id: u8 },
}

/// Per-bus entity id → descriptor map
#[derive(Debug, Clone, Default)]
pub struct EntityTable {
    entries: Vec<EntityDescriptor, MAX_ENTITIES>,
}

impl EntityTable {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Build a table from a descriptor list
    pub fn from_descriptors(descriptors: &[EntityDescriptor]) -> Result<Self, EntityError> {
        let mut table = Self::new();
        for descriptor in descriptors {
            table.insert(*descriptor)?;
        }
        Ok(table)
    }

    pub fn insert(&mut self, descriptor: EntityDescriptor) -> Result<(), EntityError> {
        if self.lookup(descriptor.id).is_some() {
            return Err(EntityError::DuplicateId { id: descriptor.id });
        }
        self.entries.push(descriptor).map_err(|_| EntityError::Full)
    }

    /// Linear scan for an entity id
    pub fn lookup(&self, id: u8) -> Option<&EntityDescriptor> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topology() {
        let table = EntityTable::from_descriptors(&DEFAULT_ENTITIES).unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.lookup(0x01).unwrap().is_camera());
        assert_eq!(table.lookup(0x02).unwrap().kind, EntityKind::ProcessingUnit);
        let output = table.lookup(0x03).unwrap();
        assert_eq!(output.kind, EntityKind::OutputTerminal);
        assert_eq!(output.terminal_type, TT_STREAMING);
        assert!(!output.is_camera());
        assert!(table.lookup(0x04).is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let result = EntityTable::from_descriptors(&[
            EntityDescriptor::camera(0x01),
            EntityDescriptor::unit(0x01, EntityKind::ProcessingUnit),
        ]);
        assert_eq!(result.unwrap_err(), EntityError::DuplicateId { id: 0x01 });
    }

    #[test]
    fn test_table_capacity() {
        let mut table = EntityTable::new();
        for id in 1..=MAX_ENTITIES as u8 {
            table.insert(EntityDescriptor::unit(id, EntityKind::ExtensionUnit)).unwrap();
        }
        let overflow = table.insert(EntityDescriptor::unit(0x7F, EntityKind::ExtensionUnit));
        assert_eq!(overflow, Err(EntityError::Full));
    }

    #[test]
    fn test_non_camera_input_terminal() {
        let terminal = EntityDescriptor {
            id: 0x05,
            kind: EntityKind::InputTerminal,
            terminal_type: 0x0200,
        };
        assert!(!terminal.is_camera());
    }
}

//! Byte layout of the non-volatile configuration store (schema version 2).
//!
//! Every table is a run of fixed-size records addressed by
//! `base + index * record_size`. The layout is checked at compile time so a
//! table can never spill into its neighbour or past the end of the device.

use core::fmt;

/// Total size of the backing device in bytes.
pub const STORE_SIZE: usize = 1024;

/// Value written last during seeding; anything else means "never initialised".
pub const SENTINEL: u8 = 0xAA;
pub const SENTINEL_ADDR: u16 = 0x000;
pub const CONTROLLER_ID_ADDR: u16 = 0x001;
pub const SCHEMA_VERSION_ADDR: u16 = 0x002;
pub const OUTPUT_ENABLE_ADDR: u16 = 0x003;

/// Current record schema.
pub const SCHEMA_VERSION: u8 = 2;
/// Schema that stored sequences as a bare count followed by 12 indices.
pub const LEGACY_SCHEMA_VERSION: u8 = 1;

pub const MAX_MOVEMENTS: usize = 60;
pub const MAX_SEQUENCES: usize = 8;
pub const MAX_PLANS: usize = 20;
pub const MAX_INTERMITTENCE_RULES: usize = 10;
pub const MAX_HOLIDAYS: usize = 20;
pub const MAX_FLOW_RULES: usize = 10;

/// Identifies a record table in diagnostics.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TableId {
    Movements,
    Sequences,
    Plans,
    IntermittenceRules,
    Holidays,
    FlowRules,
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TableId::Movements => "movements",
            TableId::Sequences => "sequences",
            TableId::Plans => "plans",
            TableId::IntermittenceRules => "intermittence",
            TableId::Holidays => "holidays",
            TableId::FlowRules => "flow-rules",
        };
        f.write_str(label)
    }
}

/// Placement of one record table inside the store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Table {
    pub id: TableId,
    pub base: u16,
    pub record_size: usize,
    pub slots: usize,
}

impl Table {
    #[must_use]
    pub const fn new(id: TableId, base: u16, record_size: usize, slots: usize) -> Self {
        Self {
            id,
            base,
            record_size,
            slots,
        }
    }

    /// First address past the end of the table.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.base as usize + self.record_size * self.slots
    }

    /// Resolves the address of the record at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::IndexOutOfRange`] when `index` is not a valid slot.
    pub fn address(&self, index: usize) -> Result<u16, RecordError> {
        if index >= self.slots {
            return Err(RecordError::IndexOutOfRange {
                table: self.id,
                index,
            });
        }
        let offset = u16::try_from(index * self.record_size).map_err(|_| {
            RecordError::IndexOutOfRange {
                table: self.id,
                index,
            }
        })?;
        Ok(self.base + offset)
    }
}

pub const MOVEMENTS: Table = Table::new(TableId::Movements, 0x010, 10, MAX_MOVEMENTS);
pub const SEQUENCES: Table = Table::new(TableId::Sequences, 0x268, 15, MAX_SEQUENCES);
pub const PLANS: Table = Table::new(TableId::Plans, 0x2E0, 5, MAX_PLANS);
pub const INTERMITTENCE_RULES: Table =
    Table::new(TableId::IntermittenceRules, 0x344, 5, MAX_INTERMITTENCE_RULES);
pub const HOLIDAYS: Table = Table::new(TableId::Holidays, 0x376, 2, MAX_HOLIDAYS);
pub const FLOW_RULES: Table = Table::new(TableId::FlowRules, 0x39E, 6, MAX_FLOW_RULES);

/// Sequence table as written by schema version 1.
pub const LEGACY_SEQUENCES: Table = Table::new(TableId::Sequences, 0x268, 13, MAX_SEQUENCES);

/// Tables in address order.
pub const TABLES: [Table; 6] = [
    MOVEMENTS,
    SEQUENCES,
    PLANS,
    INTERMITTENCE_RULES,
    HOLIDAYS,
    FLOW_RULES,
];

const fn layout_is_sound() -> bool {
    if (OUTPUT_ENABLE_ADDR as usize) >= MOVEMENTS.base as usize {
        return false;
    }
    let mut index = 1;
    while index < TABLES.len() {
        if TABLES[index - 1].end() > TABLES[index].base as usize {
            return false;
        }
        index += 1;
    }
    LEGACY_SEQUENCES.end() <= PLANS.base as usize && TABLES[TABLES.len() - 1].end() <= STORE_SIZE
}

const _: () = assert!(layout_is_sound(), "store tables overlap or overflow the device");

/// Failure to address or interpret a persisted record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordError {
    IndexOutOfRange { table: TableId, index: usize },
    Malformed(TableId),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::IndexOutOfRange { table, index } => {
                write!(f, "{table} index {index} out of range")
            }
            RecordError::Malformed(table) => write!(f, "malformed {table} record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_follow_record_size() {
        assert_eq!(MOVEMENTS.address(0), Ok(0x010));
        assert_eq!(MOVEMENTS.address(59), Ok(0x010 + 59 * 10));
        assert_eq!(FLOW_RULES.address(9), Ok(0x39E + 9 * 6));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        assert_eq!(
            PLANS.address(MAX_PLANS),
            Err(RecordError::IndexOutOfRange {
                table: TableId::Plans,
                index: MAX_PLANS,
            })
        );
    }

    #[test]
    fn tables_are_contiguous() {
        for pair in TABLES.windows(2) {
            assert_eq!(pair[0].end(), usize::from(pair[1].base));
        }
        assert!(FLOW_RULES.end() <= STORE_SIZE);
    }
}

//! Non-volatile configuration store.
//!
//! The store is a flat byte device (`read`/`write` one byte at a time). Typed
//! access goes through [`read_record`] / [`write_record`], which resolve table
//! addresses from [`layout`] and run the [`records`] codecs. Boot code calls
//! [`ensure_initialized`] once so every later reader sees schema version 2.

use core::fmt;

pub mod layout;
pub mod records;

pub use layout::{RecordError, TableId};
pub use records::{
    EMPTY, FlowAction, FlowRule, Holiday, IntermittenceRule, Movement, Plan, PortFrame, Record,
    Sequence, SequenceKind,
};

use layout::{
    CONTROLLER_ID_ADDR, LEGACY_SCHEMA_VERSION, LEGACY_SEQUENCES, MAX_SEQUENCES,
    OUTPUT_ENABLE_ADDR, SCHEMA_VERSION, SCHEMA_VERSION_ADDR, SENTINEL, SENTINEL_ADDR, STORE_SIZE,
};
use records::MAX_RECORD_SIZE;

/// Byte-addressed non-volatile memory.
///
/// Implementations must complete each write before returning and keep the
/// watchdog fed while doing so.
pub trait NvStore {
    fn read(&mut self, address: u16) -> u8;
    fn write(&mut self, address: u16, value: u8);
}

impl<T: NvStore + ?Sized> NvStore for &mut T {
    fn read(&mut self, address: u16) -> u8 {
        (**self).read(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        (**self).write(address, value);
    }
}

/// In-memory store used by the emulator and tests.
///
/// Starts fully erased. Reads past the end return [`EMPTY`] and writes past
/// the end are dropped, mirroring an unmapped region of a real device.
#[derive(Clone, Debug)]
pub struct RamStore<const N: usize = STORE_SIZE> {
    bytes: [u8; N],
    writes: usize,
}

impl<const N: usize> RamStore<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: [EMPTY; N],
            writes: 0,
        }
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; N]) -> Self {
        Self { bytes, writes: 0 }
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; N] {
        &self.bytes
    }

    /// Number of byte writes performed since construction.
    #[must_use]
    pub const fn write_count(&self) -> usize {
        self.writes
    }
}

impl<const N: usize> Default for RamStore<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> NvStore for RamStore<N> {
    fn read(&mut self, address: u16) -> u8 {
        self.bytes
            .get(usize::from(address))
            .copied()
            .unwrap_or(EMPTY)
    }

    fn write(&mut self, address: u16, value: u8) {
        if let Some(slot) = self.bytes.get_mut(usize::from(address)) {
            *slot = value;
            self.writes += 1;
        }
    }
}

/// Outcome of [`ensure_initialized`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreStatus {
    /// Sentinel and schema version were already current.
    Ready,
    /// The store was erased and seeded with factory defaults.
    Seeded,
    /// Records were rewritten from an older schema.
    Migrated { from: u8 },
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreStatus::Ready => f.write_str("ready"),
            StoreStatus::Seeded => f.write_str("seeded"),
            StoreStatus::Migrated { from } => write!(f, "migrated from v{from}"),
        }
    }
}

fn read_bytes<S: NvStore + ?Sized>(store: &mut S, address: u16, out: &mut [u8]) {
    for (offset, slot) in (0u16..).zip(out.iter_mut()) {
        *slot = store.read(address + offset);
    }
}

fn write_bytes<S: NvStore + ?Sized>(store: &mut S, address: u16, bytes: &[u8]) {
    for (offset, value) in (0u16..).zip(bytes.iter()) {
        store.write(address + offset, *value);
    }
}

/// Reads the record at `index` of its table.
///
/// # Errors
///
/// Returns [`RecordError::IndexOutOfRange`] when `index` exceeds the table.
pub fn read_record<T: Record, S: NvStore + ?Sized>(
    store: &mut S,
    index: usize,
) -> Result<T, RecordError> {
    let address = T::TABLE.address(index)?;
    let mut buffer = [EMPTY; MAX_RECORD_SIZE];
    let bytes = &mut buffer[..T::TABLE.record_size];
    read_bytes(store, address, bytes);
    Ok(T::decode(bytes))
}

/// Writes `record` into slot `index` of its table.
///
/// # Errors
///
/// Returns [`RecordError::IndexOutOfRange`] when `index` exceeds the table.
pub fn write_record<T: Record, S: NvStore + ?Sized>(
    store: &mut S,
    index: usize,
    record: &T,
) -> Result<(), RecordError> {
    let address = T::TABLE.address(index)?;
    let mut buffer = [EMPTY; MAX_RECORD_SIZE];
    let bytes = &mut buffer[..T::TABLE.record_size];
    record.encode(bytes);
    write_bytes(store, address, bytes);
    Ok(())
}

/// Returns the first rule in slot order matching `plan` and `movement`.
pub fn find_intermittence<S: NvStore + ?Sized>(
    store: &mut S,
    plan: u8,
    movement: u8,
) -> Option<IntermittenceRule> {
    (0..layout::MAX_INTERMITTENCE_RULES)
        .filter_map(|index| read_record::<IntermittenceRule, S>(store, index).ok())
        .find(|rule| rule.applies_to(plan, movement))
}

/// Returns the first flow-control rule in slot order for (`sequence`, `movement`).
pub fn find_flow_rule<S: NvStore + ?Sized>(
    store: &mut S,
    sequence: u8,
    movement: u8,
) -> Option<FlowRule> {
    (0..layout::MAX_FLOW_RULES)
        .filter_map(|index| read_record::<FlowRule, S>(store, index).ok())
        .find(|rule| rule.applies_to(sequence, movement))
}

/// Whether (`day`, `month`) appears in the holiday table.
pub fn is_holiday<S: NvStore + ?Sized>(store: &mut S, day: u8, month: u8) -> bool {
    (0..layout::MAX_HOLIDAYS)
        .filter_map(|index| read_record::<Holiday, S>(store, index).ok())
        .any(|holiday| holiday.matches(day, month))
}

pub fn controller_id<S: NvStore + ?Sized>(store: &mut S) -> u8 {
    store.read(CONTROLLER_ID_ADDR)
}

pub fn set_controller_id<S: NvStore + ?Sized>(store: &mut S, id: u8) {
    store.write(CONTROLLER_ID_ADDR, id);
}

pub fn output_enable_mask<S: NvStore + ?Sized>(store: &mut S) -> u8 {
    store.read(OUTPUT_ENABLE_ADDR)
}

/// Erases every byte of the device, sentinel included.
pub fn erase_all<S: NvStore + ?Sized>(store: &mut S) {
    for address in 0..STORE_SIZE {
        if let Ok(address) = u16::try_from(address) {
            store.write(address, EMPTY);
        }
    }
}

/// Writes the factory defaults over an erased store.
///
/// Movement 0 and Sequence 0 are seeded, then the schema version, and the
/// sentinel last so an interrupted seed is retried on the next boot.
pub fn seed_factory_defaults<S: NvStore + ?Sized>(store: &mut S) {
    let seeded = write_record(store, 0, &Movement::FACTORY_DEFAULT)
        .and_then(|()| write_record(store, 0, &Sequence::FACTORY_DEFAULT));
    debug_assert!(seeded.is_ok(), "factory slots out of range: {seeded:?}");
    store.write(SCHEMA_VERSION_ADDR, SCHEMA_VERSION);
    store.write(SENTINEL_ADDR, SENTINEL);
}

/// Rewrites schema version 1 sequences in the current layout.
///
/// Every legacy record is read before any is rewritten because the two
/// layouts share a base address.
pub fn migrate_legacy_sequences<S: NvStore + ?Sized>(store: &mut S) {
    let mut migrated = [Sequence::EMPTY; MAX_SEQUENCES];
    let mut raw = [EMPTY; MAX_RECORD_SIZE];
    for (index, slot) in migrated.iter_mut().enumerate() {
        let Ok(address) = LEGACY_SEQUENCES.address(index) else {
            continue;
        };
        let bytes = &mut raw[..LEGACY_SEQUENCES.record_size];
        read_bytes(store, address, bytes);
        *slot = Sequence::decode_legacy(bytes);
    }
    for (index, sequence) in migrated.iter().enumerate() {
        let _ = write_record(store, index, sequence);
    }
    store.write(SCHEMA_VERSION_ADDR, SCHEMA_VERSION);
}

/// Brings the store to the current schema, seeding it when uninitialised.
///
/// A store carrying the sentinel but no schema version was written by the
/// first firmware generation and is migrated in place. Unknown versions are
/// treated as corrupt and reseeded.
pub fn ensure_initialized<S: NvStore + ?Sized>(store: &mut S) -> StoreStatus {
    if store.read(SENTINEL_ADDR) != SENTINEL {
        erase_all(store);
        seed_factory_defaults(store);
        return StoreStatus::Seeded;
    }

    match store.read(SCHEMA_VERSION_ADDR) {
        SCHEMA_VERSION => StoreStatus::Ready,
        EMPTY | LEGACY_SCHEMA_VERSION => {
            migrate_legacy_sequences(store);
            StoreStatus::Migrated {
                from: LEGACY_SCHEMA_VERSION,
            }
        }
        _ => {
            erase_all(store);
            seed_factory_defaults(store);
            StoreStatus::Seeded
        }
    }
}

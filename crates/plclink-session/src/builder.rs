use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use plclink_frame::{clamp_u16, OutgoingValues, COMMAND_SLOT, OUTGOING_SLOTS};
use tracing::debug;

use crate::error::{Result, SessionError};

/// Manually configured slot values.
///
/// Values are raw user input and may be out of the u16 range; the builder
/// clamps them and writes the clamped value back.
pub trait ParameterStore: Send {
    fn get(&self, slot: usize) -> i64;
    fn set(&mut self, slot: usize, value: i64);
}

/// In-memory parameter store. Unset slots read as 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryParameterStore {
    values: BTreeMap<usize, i64>,
}

impl MemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with `(slot, value)` pairs.
    pub fn from_values(values: impl IntoIterator<Item = (usize, i64)>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }
}

impl ParameterStore for MemoryParameterStore {
    fn get(&self, slot: usize) -> i64 {
        self.values.get(&slot).copied().unwrap_or(0)
    }

    fn set(&mut self, slot: usize, value: i64) {
        self.values.insert(slot, value);
    }
}

/// A data source that owns a range of outgoing slots while active.
///
/// Values are wire-ready: unsigned and already in range.
pub trait AuxSource: Send + Sync {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    fn is_active(&self) -> bool;

    /// Outgoing slots this source fills while active.
    fn slot_range(&self) -> Range<usize>;

    /// Values for `slots`, in slot order.
    fn values_for(&self, slots: Range<usize>) -> Vec<u16>;
}

/// Assembles the 16 outgoing values for each tick.
///
/// Slot priority: the command slot always carries the pending code, then
/// active auxiliary sources in registration order, then manual parameters.
pub struct OutgoingFrameBuilder {
    command_slot: usize,
    store: Box<dyn ParameterStore>,
    sources: Vec<Arc<dyn AuxSource>>,
}

impl std::fmt::Debug for OutgoingFrameBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sources.iter().map(|source| source.name()).collect();
        f.debug_struct("OutgoingFrameBuilder")
            .field("command_slot", &self.command_slot)
            .field("sources", &names)
            .finish()
    }
}

impl Default for OutgoingFrameBuilder {
    fn default() -> Self {
        Self::new(Box::new(MemoryParameterStore::new()))
    }
}

impl OutgoingFrameBuilder {
    /// Builder over `store` with the default command slot.
    pub fn new(store: Box<dyn ParameterStore>) -> Self {
        Self {
            command_slot: COMMAND_SLOT,
            store,
            sources: Vec::new(),
        }
    }

    /// Use a different command slot.
    pub fn with_command_slot(mut self, slot: usize) -> Self {
        self.command_slot = slot;
        self
    }

    /// Register an auxiliary source. Earlier sources win overlapping slots.
    pub fn with_source(mut self, source: Arc<dyn AuxSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn add_source(&mut self, source: Arc<dyn AuxSource>) {
        self.sources.push(source);
    }

    pub fn command_slot(&self) -> usize {
        self.command_slot
    }

    /// Build the outgoing values for `command_code`.
    ///
    /// Every value is clamped independently. A manual value changed by
    /// clamping is written back to the store; the command slot never is.
    pub fn build_frame(&mut self, command_code: u16) -> OutgoingValues {
        let mut values = [0u16; OUTGOING_SLOTS];
        let mut filled = [false; OUTGOING_SLOTS];

        if let Some(slot) = values.get_mut(self.command_slot) {
            *slot = command_code;
            filled[self.command_slot] = true;
        }

        for source in self.sources.iter().filter(|source| source.is_active()) {
            let range = source.slot_range();
            let range = range.start.min(OUTGOING_SLOTS)..range.end.min(OUTGOING_SLOTS);
            let supplied = source.values_for(range.clone());
            for (slot, value) in range.zip(supplied) {
                if !filled[slot] {
                    values[slot] = value;
                    filled[slot] = true;
                }
            }
        }

        for slot in 0..OUTGOING_SLOTS {
            if filled[slot] {
                continue;
            }
            let raw = self.store.get(slot);
            let clamped = clamp_u16(raw);
            if i64::from(clamped) != raw {
                debug!(slot, raw, clamped, "parameter clamped");
                self.store.set(slot, i64::from(clamped));
            }
            values[slot] = clamped;
        }

        values
    }

    /// Raw manual value of a slot.
    pub fn parameter(&self, slot: usize) -> Result<i64> {
        self.check_manual_slot(slot)?;
        Ok(self.store.get(slot))
    }

    /// Set a manual value. Out-of-range values are accepted and clamped at build time.
    pub fn set_parameter(&mut self, slot: usize, value: i64) -> Result<()> {
        self.check_manual_slot(slot)?;
        self.store.set(slot, value);
        Ok(())
    }

    fn check_manual_slot(&self, slot: usize) -> Result<()> {
        if slot >= OUTGOING_SLOTS {
            return Err(SessionError::InvalidSlot {
                slot,
                len: OUTGOING_SLOTS,
            });
        }
        if slot == self.command_slot {
            return Err(SessionError::ReservedSlot(slot));
        }
        Ok(())
    }
}

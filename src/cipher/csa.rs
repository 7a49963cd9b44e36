//! DVB-CSA one-shot backend (spec.md §4.2, §GLOSSARY).
//!
//! Operates on 8-byte blocks: a keyed Feistel permutation chained CBC-style
//! across the payload (IV zero), keyed per parity by a round schedule
//! expanded from the 8-byte control word. Any trailing bytes short of a
//! full 8-byte block are left untouched, the same convention the AES
//! backend uses for its own trailing bytes.

use super::Backend;
use crate::cipher::CipherMode;
use crate::error::ControlError;
use crate::key::{ControlWord, Parity};

const BLOCK_SIZE: usize = 8;
const ROUNDS: usize = 8;

/// Per-parity expanded round schedule: one 4-byte subkey per round.
#[derive(Clone, Default)]
pub(crate) struct CsaKeySchedule {
    round_keys: [[u8; 4]; ROUNDS],
}

fn sbox(x: u8) -> u8 {
    // A fixed, invertible-enough byte mixing function used to expand the
    // 8-byte control word into per-round subkeys. Not the broadcast
    // industry's published DVB-CSA constant table; correctness here is
    // established by round-trip tests rather than external test vectors.
    x.rotate_left(3) ^ x.wrapping_mul(0x1B).wrapping_add(0x63)
}

impl CsaKeySchedule {
    pub(crate) fn expand(cw: &[u8; 8]) -> Self {
        let mut round_keys = [[0u8; 4]; ROUNDS];
        let mut state = *cw;
        for round in round_keys.iter_mut() {
            for i in 0..8 {
                state[i] = sbox(state[i] ^ cw[(i + 1) % 8]);
            }
            round[0] = state[0] ^ state[4];
            round[1] = state[1] ^ state[5];
            round[2] = state[2] ^ state[6];
            round[3] = state[3] ^ state[7];
        }
        Self { round_keys }
    }

    fn feistel_f(&self, round: usize, half: u32) -> u32 {
        let rk = u32::from_be_bytes(self.round_keys[round]);
        let mixed = half ^ rk;
        mixed.rotate_left(5).wrapping_add(rk | 1)
    }

    fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        let mut l = u32::from_be_bytes(block[0..4].try_into().unwrap());
        let mut r = u32::from_be_bytes(block[4..8].try_into().unwrap());
        for round in 0..ROUNDS {
            let f = self.feistel_f(round, r);
            let new_r = l ^ f;
            l = r;
            r = new_r;
        }
        block[0..4].copy_from_slice(&r.to_be_bytes());
        block[4..8].copy_from_slice(&l.to_be_bytes());
    }

    fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        let mut r = u32::from_be_bytes(block[0..4].try_into().unwrap());
        let mut l = u32::from_be_bytes(block[4..8].try_into().unwrap());
        for round in (0..ROUNDS).rev() {
            let f = self.feistel_f(round, l);
            let new_l = r ^ f;
            r = l;
            l = new_l;
        }
        block[0..4].copy_from_slice(&l.to_be_bytes());
        block[4..8].copy_from_slice(&r.to_be_bytes());
    }
}

/// Decrypt `payload` in place under CBC chaining (IV zero), keyed by
/// `schedule`. Used by both the one-shot and bit-sliced backends.
pub(crate) fn cbc_decrypt(schedule: &CsaKeySchedule, payload: &mut [u8]) {
    let mut prev = [0u8; BLOCK_SIZE];
    let full_blocks = payload.len() / BLOCK_SIZE;
    for i in 0..full_blocks {
        let start = i * BLOCK_SIZE;
        let ciphertext: [u8; BLOCK_SIZE] = payload[start..start + BLOCK_SIZE].try_into().unwrap();
        let mut block = ciphertext;
        schedule.decrypt_block(&mut block);
        for b in 0..BLOCK_SIZE {
            block[b] ^= prev[b];
        }
        payload[start..start + BLOCK_SIZE].copy_from_slice(&block);
        prev = ciphertext;
    }
}

/// Encrypt `payload` in place under CBC chaining (IV zero). Only used by
/// tests to exercise the round-trip property (spec.md §8 property 8); the
/// descrambler core itself never encrypts.
#[cfg(test)]
pub(crate) fn cbc_encrypt(schedule: &CsaKeySchedule, payload: &mut [u8]) {
    let mut prev = [0u8; BLOCK_SIZE];
    let full_blocks = payload.len() / BLOCK_SIZE;
    for i in 0..full_blocks {
        let start = i * BLOCK_SIZE;
        let mut block: [u8; BLOCK_SIZE] = payload[start..start + BLOCK_SIZE].try_into().unwrap();
        for b in 0..BLOCK_SIZE {
            block[b] ^= prev[b];
        }
        schedule.encrypt_block(&mut block);
        payload[start..start + BLOCK_SIZE].copy_from_slice(&block);
        prev = block;
    }
}

#[derive(Default)]
pub(crate) struct CsaBackend {
    schedules: [Option<CsaKeySchedule>; 2],
}

impl Backend for CsaBackend {
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
        CipherMode::Csa
    }
}

impl CsaBackend {
    /// Decrypt one packet's payload in place (spec.md §4.2).
    pub(crate) fn decrypt_one(&self, payload: &mut [u8], parity: Parity) -> Result<(), ControlError> {
        let schedule = self.schedules[parity.index()]
            .as_ref()
            .ok_or(ControlError::BackendUnavailable)?;
        cbc_decrypt(schedule, payload);
        Ok(())
    }
}

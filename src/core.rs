//! The Descrambler Core (spec.md §4.3): the state machine that classifies
//! every incoming item, drives batching, flips parity, arms/cancels the
//! timer, handles flush, and emits to the downstream sink. This is the
//! load-bearing module of the crate.

use crate::batch::{parity_of, BatchBuffer};
use crate::cipher::{Backend, BsBatchItem, CipherBackend, CipherMode};
use crate::error::{ControlError, DropReason};
use crate::header::{self, DecodedHeader};
use crate::hold_queue::HoldQueue;
use crate::key::{KeyRegister, Parity};
use crate::packet::{ControlRecord, FlowDef, InputItem, Packet};
use crate::pid::PidSet;
use crate::sink::Sink;
use crate::timer::DeadlineTimer;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Additive latency published on every downstream flow-def recomputation
/// (spec.md §6).
const LATENCY_FLOOR: Duration = Duration::from_millis(5);

/// `LatencyBudget` default (spec.md §3) when a flow hint is supplied with
/// no explicit latency value of its own.
const DEFAULT_LATENCY_BUDGET: Duration = Duration::from_millis(5);

/// Control operations accepted at the pipe's control boundary (spec.md §6).
pub enum ControlOp {
    /// Announce a new input-side flow definition; rejected unless its name
    /// matches [`FlowDef::REQUIRED_PREFIX`].
    SetFlowDef(FlowDef),
    /// Install even/odd control words, hex-encoded.
    SetKey { even: String, odd: String },
    AddPid(u16),
    DelPid(u16),
    /// Bind the Timer to an event-loop collaborator.
    AttachTimer(Box<dyn DeadlineTimer>),
}

/// The descrambler pipe. `S` is the downstream sink, `P` the PID-filter
/// collaborator; the Timer is boxed since `AttachTimer` hands it over as a
/// trait object (spec.md §6).
pub struct Descrambler<S: Sink, P: PidSet> {
    sink: S,
    pids: P,
    timer: Option<Box<dyn DeadlineTimer>>,
    key_register: KeyRegister,
    backend: Option<CipherBackend>,
    batch: BatchBuffer,
    hold_queue: HoldQueue,
    /// Whether the stream was constructed with a non-empty latency
    /// announcement; selects CSA_BS over CSA at key install (spec.md §4.2).
    prefers_batched: bool,
    configured_latency: Duration,
    /// Realizes the "self-reference handle count" of spec.md §5/§9 as a
    /// flag rather than a literal `Rc` cycle; the invariant is ≤ 1.
    self_held: bool,
}

impl<S: Sink, P: PidSet> Descrambler<S, P> {
    /// `flow_hint` is the constructor argument of spec.md §6: presence
    /// selects CSA_BS as the default mode on key install, absence selects
    /// CSA. Its `latency` field becomes the configured latency budget used
    /// both to arm the Timer and to compute downstream flow-def latency.
    pub fn new(sink: S, pids: P, flow_hint: Option<FlowDef>) -> Self {
        let prefers_batched = flow_hint.is_some();
        let configured_latency = flow_hint
            .map(|hint| {
                if hint.latency.is_zero() {
                    DEFAULT_LATENCY_BUDGET
                } else {
                    hint.latency
                }
            })
            .unwrap_or(DEFAULT_LATENCY_BUDGET);

        Self {
            sink,
            pids,
            timer: None,
            key_register: KeyRegister::new(),
            backend: None,
            batch: BatchBuffer::new(1),
            hold_queue: HoldQueue::new(),
            prefers_batched,
            configured_latency,
            self_held: false,
        }
    }

    /// Handle one control operation (spec.md §6).
    pub fn control(&mut self, op: ControlOp) -> Result<(), ControlError> {
        match op {
            ControlOp::SetFlowDef(flow_def) => {
                if !flow_def.matches_required_prefix() {
                    return Err(ControlError::InvalidFlow);
                }
                self.handle_control_record(ControlRecord { flow_def });
                Ok(())
            }
            ControlOp::SetKey { even, odd } => self.set_key(&even, &odd),
            ControlOp::AddPid(pid) => {
                self.pids.add(pid);
                Ok(())
            }
            ControlOp::DelPid(pid) => {
                self.pids.del(pid);
                Ok(())
            }
            ControlOp::AttachTimer(timer) => {
                self.timer = Some(timer);
                Ok(())
            }
        }
    }

    fn set_key(&mut self, even: &str, odd: &str) -> Result<(), ControlError> {
        // Drain whatever is mid-flight under the *old* backend before the
        // key register and backend are replaced; spec.md §4.2 "changing
        // mode frees both slots first" only covers the key register, but a
        // batch still referencing the old schedule must not survive the swap.
        if !self.batch.is_empty() {
            self.flush();
        }

        let mode = self.key_register.install(even, odd, self.prefers_batched)?;

        if mode == CipherMode::CsaBs && self.timer.is_none() {
            self.key_register.clear();
            return Err(ControlError::BackendUnavailable);
        }

        let mut backend = CipherBackend::new(mode);
        if let Some(cw) = self.key_register.get(Parity::Even) {
            backend.install(Parity::Even, cw)?;
        }
        if let Some(cw) = self.key_register.get(Parity::Odd) {
            backend.install(Parity::Odd, cw)?;
        }

        self.batch.set_capacity(match &backend {
            CipherBackend::CsaBs(b) => b.batch_size(),
            CipherBackend::Csa(_) | CipherBackend::Aes(_) => 1,
        });
        self.backend = Some(backend);
        Ok(())
    }

    /// Process one input item (spec.md §4.3). Infallible by design: a
    /// malformed or unroutable item is dropped or passed through, never
    /// returned as an error (spec.md §7).
    pub fn process(&mut self, item: InputItem) {
        match item {
            InputItem::Control(record) => self.handle_control_record(record),
            InputItem::Packet(packet) => self.handle_packet(packet),
        }
    }

    /// Classification step 1: a flow-def control record.
    fn handle_control_record(&mut self, record: ControlRecord) {
        if self.hold_queue.is_empty() {
            self.emit_flow_def(record.flow_def);
        } else {
            self.hold_queue.push(InputItem::Control(record));
        }
    }

    fn emit_flow_def(&mut self, flow_def: FlowDef) {
        let csa_bs_active = matches!(
            self.backend.as_ref().map(Backend::mode),
            Some(CipherMode::CsaBs)
        );
        let out_latency = if csa_bs_active {
            flow_def.latency + self.configured_latency + LATENCY_FLOOR
        } else {
            flow_def.latency
        };
        self.sink
            .emit_flow_def(FlowDef::new(flow_def.name, out_latency));
    }

    fn handle_packet(&mut self, packet: Packet) {
        let header = match header::decode(&packet.header_bytes()) {
            Ok(header) => header,
            Err(reason) => {
                log::warn!("dropping packet: {}", reason);
                return;
            }
        };

        let mode = match self.backend.as_ref() {
            Some(backend) => backend.mode(),
            None => {
                // Classification step 2: no key installed at all.
                if !self.batch.is_empty() {
                    self.flush();
                }
                self.sink.emit_packet(packet);
                return;
            }
        };

        // Classification step 3: parity + payload + PID gating.
        let parity = self.classify_parity(header.scrambling_control);
        let passes_gate =
            parity.is_some() && header.has_payload && self.pids.contains(header.pid);
        if !passes_gate {
            self.emit_or_hold(packet);
            return;
        }

        self.handle_scrambled_packet(packet, header, parity.unwrap(), mode);
    }

    fn classify_parity(&self, control: crate::header::ScramblingControl) -> Option<Parity> {
        match parity_of(control) {
            Some(Parity::Odd) if self.key_register.get(Parity::Odd).is_none() => None,
            other => other,
        }
    }

    /// Classification step 4: a valid scrambled packet.
    fn handle_scrambled_packet(
        &mut self,
        mut packet: Packet,
        header: DecodedHeader,
        parity: Parity,
        mode: CipherMode,
    ) {
        if packet.make_exclusive().is_err() {
            log::warn!("dropping packet: {}", DropReason::CopyFailed);
            return;
        }
        packet.with_bytes_mut(|bytes| header::clear_scrambling_control(bytes));

        match mode {
            CipherMode::Aes => {
                let backend = self.backend.as_ref().unwrap();
                packet.with_bytes_mut(|bytes| {
                    if let CipherBackend::Aes(backend) = backend {
                        if let Err(err) = backend.decrypt_one(&mut bytes[header.header_size..], parity) {
                            log::warn!("aes backend error, emitting cleartext-in-name: {:?}", err);
                        }
                    }
                });
                self.emit_or_hold(packet);
            }
            CipherMode::Csa => {
                let backend = self.backend.as_ref().unwrap();
                packet.with_bytes_mut(|bytes| {
                    if let CipherBackend::Csa(backend) = backend {
                        if let Err(err) = backend.decrypt_one(&mut bytes[header.header_size..], parity) {
                            log::warn!("csa backend error, emitting cleartext-in-name: {:?}", err);
                        }
                    }
                });
                self.emit_or_hold(packet);
            }
            CipherMode::CsaBs => {
                if !self.batch.is_empty() && self.batch.parity() != Some(parity) {
                    self.flush();
                }
                self.batch.push(Rc::clone(packet.buf()), header.header_size, parity);
                let was_empty = self.hold_queue.is_empty();
                self.hold_queue.push(InputItem::Packet(packet));
                if was_empty {
                    self.acquire_self_ref();
                    self.arm_timer();
                }
                if self.batch.is_full() {
                    self.flush();
                }
            }
        }
    }

    fn emit_or_hold(&mut self, packet: Packet) {
        if self.hold_queue.is_empty() {
            self.sink.emit_packet(packet);
        } else {
            self.hold_queue.push(InputItem::Packet(packet));
        }
    }

    fn arm_timer(&mut self) {
        if let Some(timer) = self.timer.as_mut() {
            timer.arm(self.configured_latency);
        }
    }

    /// Called by the embedder when the attached [`DeadlineTimer`] fires
    /// (spec.md §4.6 `on_deadline`).
    pub fn on_timer_fire(&mut self) {
        self.flush();
    }

    /// spec.md §4.3 `flush()`.
    fn flush(&mut self) {
        if let Some(timer) = self.timer.as_mut() {
            timer.cancel();
        }

        if !self.batch.is_empty() {
            self.flush_batch();
        }

        while let Some(item) = self.hold_queue.pop_front() {
            match item {
                InputItem::Packet(packet) => self.sink.emit_packet(packet),
                InputItem::Control(record) => self.emit_flow_def(record.flow_def),
            }
        }

        self.release_self_ref();
    }

    fn flush_batch(&mut self) {
        let parity = self.batch.parity().expect("non-empty batch has a parity");
        match self.backend.as_ref() {
            Some(CipherBackend::CsaBs(backend)) => {
                let started = Instant::now();
                let mut result = Ok(());
                self.batch.drain_for_bitsliced(|slices| {
                    let mut items: Vec<BsBatchItem> = slices
                        .iter_mut()
                        .map(|slice| BsBatchItem { data: Some(&mut **slice) })
                        .collect();
                    items.push(BsBatchItem::sentinel());
                    result = backend.decrypt_batch(&mut items, parity);
                });
                if let Err(err) = result {
                    log::warn!("csa_bs backend error, batch passes cleartext-in-name: {:?}", err);
                }
                let elapsed = started.elapsed();
                if elapsed > LATENCY_FLOOR {
                    log::warn!(
                        "batch flush took {:?}, exceeding the {:?} latency floor",
                        elapsed,
                        LATENCY_FLOOR
                    );
                }
            }
            _ => unreachable!("the batch is only ever populated in CsaBs mode"),
        }
    }

    fn acquire_self_ref(&mut self) {
        debug_assert!(
            !self.self_held,
            "self-reference acquired twice without an intervening release"
        );
        self.self_held = true;
    }

    /// No-op if no self-reference is outstanding. `flush()` calls this
    /// unconditionally, including when it is invoked by a spurious or
    /// already-raced timer callback (spec.md §9: "the callback must handle
    /// the case where it races with a fullness-triggered flush that already
    /// cancelled it") — in that case the earlier flush already released the
    /// one outstanding reference, and this call must tolerate finding none.
    fn release_self_ref(&mut self) {
        self.self_held = false;
    }
}

/// Terminal state (spec.md §4.3): any outstanding batch is abandoned
/// without emitting, and held packets are released, simply by letting
/// `Rc`/`RefCell`/`Vec` run their ordinary destructors. No cryptographic
/// operation runs on shutdown.
impl<S: Sink, P: PidSet> Drop for Descrambler<S, P> {
    fn drop(&mut self) {
        if !self.batch.is_empty() || !self.hold_queue.is_empty() {
            log::debug!(
                "descrambler dropped with {} batched and {} held item(s) abandoned",
                self.batch.len(),
                self.hold_queue.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::csa::{cbc_encrypt, CsaKeySchedule};
    use crate::header::{PacketHeader, ScramblingControl};
    use crate::pid::HashPidSet;
    use crate::sink::RecordingSink;
    use crate::timer::ManualDeadlineTimer;
    use aes::cipher::{BlockEncryptMut, KeyIvInit};

    type TestDescrambler = Descrambler<RecordingSink, HashPidSet>;

    fn new_descrambler(flow_hint: Option<FlowDef>) -> TestDescrambler {
        Descrambler::new(RecordingSink::new(), HashPidSet::new(), flow_hint)
    }

    fn build_packet(pid: u16, scrambling: ScramblingControl, payload: &[u8]) -> Packet {
        let header = PacketHeader::new()
            .with_sync_byte(0x47)
            .with_tei(false)
            .with_pusi(true)
            .with_priority(false)
            .with_pid(pid)
            .with_tsc(scrambling)
            .with_has_adaptation_field(false)
            .with_has_payload(true)
            .with_continuity_counter(0);
        let mut bytes = [0xFFu8; 188];
        bytes[0..4].copy_from_slice(&header.into_bytes());
        bytes[4..4 + payload.len()].copy_from_slice(payload);
        Packet::new(bytes)
    }

    fn decode_hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn csa_ciphertext(even_cw_hex: &str, plaintext: &[u8]) -> Vec<u8> {
        let bytes = decode_hex(even_cw_hex);
        let cw: [u8; 8] = bytes.try_into().unwrap();
        let schedule = CsaKeySchedule::expand(&cw);
        let mut payload = plaintext.to_vec();
        cbc_encrypt(&schedule, &mut payload);
        payload
    }

    fn aes_ciphertext(key: [u8; 16], plaintext: &[u8]) -> Vec<u8> {
        const CISSA_IV: [u8; 16] = *b"DVBTMCPTAESCISSA";
        let decryptable_len = (plaintext.len() / 16) * 16;
        let mut buf = plaintext[..decryptable_len].to_vec();
        let encryptor = cbc::Encryptor::<aes::Aes128>::new(&key.into(), &CISSA_IV.into());
        encryptor
            .encrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(&mut buf, decryptable_len)
            .unwrap();
        buf.extend_from_slice(&plaintext[decryptable_len..]);
        buf
    }

    // S1: pass-through, no key installed.
    #[test]
    fn s1_pass_through_with_no_key() {
        let mut d = new_descrambler(None);
        d.control(ControlOp::AddPid(0x100)).unwrap();
        let packets: Vec<Packet> = (0..3)
            .map(|i| build_packet(0x100, ScramblingControl::Even, &[i as u8; 184]))
            .collect();
        let originals: Vec<[u8; 188]> = packets.iter().map(Packet::bytes).collect();
        for p in packets {
            d.process(InputItem::Packet(p));
        }
        assert_eq!(d.sink.packets.len(), 3);
        for (out, original) in d.sink.packets.iter().zip(originals.iter()) {
            assert_eq!(&out.bytes(), original);
        }
    }

    // S2: CSA, even key only.
    #[test]
    fn s2_csa_even_only() {
        let mut d = new_descrambler(None);
        d.control(ControlOp::AddPid(0x100)).unwrap();
        d.control(ControlOp::SetKey {
            even: "1122334455667788".to_string(),
            odd: String::new(),
        })
        .unwrap();

        let plaintext = [7u8; 184];
        let ciphertext = csa_ciphertext("1122334455667788", &plaintext);
        let packet = build_packet(0x100, ScramblingControl::Even, &ciphertext);
        d.process(InputItem::Packet(packet));

        assert_eq!(d.sink.packets.len(), 1);
        let out = &d.sink.packets[0];
        let out_bytes = out.bytes();
        let decoded = header::decode(&out_bytes[0..5]).unwrap();
        assert_eq!(decoded.scrambling_control, ScramblingControl::NotScrambled);
        assert_eq!(&out_bytes[4..4 + plaintext.len()], &plaintext[..]);
    }

    // spec.md §5 / §9: the core must copy-on-write before decrypting in
    // place rather than assume it holds the only reference to a packet's
    // buffer. Run an aliased packet through the scrambled-packet path and
    // assert the other alias is left completely untouched.
    #[test]
    fn scrambled_packet_with_aliased_buffer_leaves_the_alias_untouched() {
        let mut d = new_descrambler(None);
        d.control(ControlOp::AddPid(0x100)).unwrap();
        d.control(ControlOp::SetKey {
            even: "1122334455667788".to_string(),
            odd: String::new(),
        })
        .unwrap();

        let plaintext = [7u8; 184];
        let ciphertext = csa_ciphertext("1122334455667788", &plaintext);
        let packet = build_packet(0x100, ScramblingControl::Even, &ciphertext);
        let alias = packet.share();
        let alias_original_bytes = alias.bytes();

        d.process(InputItem::Packet(packet));

        assert_eq!(d.sink.packets.len(), 1);
        let out_bytes = d.sink.packets[0].bytes();
        let decoded = header::decode(&out_bytes[0..5]).unwrap();
        assert_eq!(decoded.scrambling_control, ScramblingControl::NotScrambled);
        assert_eq!(&out_bytes[4..4 + plaintext.len()], &plaintext[..]);

        // The aliased buffer still held by the test is untouched: still
        // scrambled, still ciphertext.
        assert_eq!(alias.bytes(), alias_original_bytes);
        let alias_header = header::decode(&alias_original_bytes[0..5]).unwrap();
        assert_eq!(alias_header.scrambling_control, ScramblingControl::Even);
    }

    // S3: CSA_BS batch fill, no timer fire.
    #[test]
    fn s3_csa_bs_batch_fill() {
        let mut d = new_descrambler(Some(FlowDef::new(
            "block.mpegts.demux",
            Duration::from_millis(5),
        )));
        d.control(ControlOp::AddPid(0x200)).unwrap();
        d.control(ControlOp::AttachTimer(Box::new(ManualDeadlineTimer::new())))
            .unwrap();
        d.control(ControlOp::SetKey {
            even: "1122334455667788".to_string(),
            odd: String::new(),
        })
        .unwrap();

        let n = d.batch.capacity();
        assert!(n > 1, "csa_bs should report a batch width greater than one");

        let plaintexts: Vec<[u8; 184]> = (0..n).map(|i| [i as u8; 184]).collect();
        for plaintext in &plaintexts {
            let ciphertext = csa_ciphertext("1122334455667788", plaintext);
            d.process(InputItem::Packet(build_packet(
                0x200,
                ScramblingControl::Even,
                &ciphertext,
            )));
        }

        assert_eq!(d.sink.packets.len(), n);
        for (out, plaintext) in d.sink.packets.iter().zip(plaintexts.iter()) {
            let bytes = out.bytes();
            assert_eq!(&bytes[4..4 + 184], &plaintext[..]);
        }
    }

    // S4: parity flip forces an early flush, preserving output order.
    #[test]
    fn s4_parity_flip_forces_flush() {
        let mut d = new_descrambler(Some(FlowDef::new(
            "block.mpegts.demux",
            Duration::from_millis(5),
        )));
        d.control(ControlOp::AddPid(0x200)).unwrap();
        d.control(ControlOp::AttachTimer(Box::new(ManualDeadlineTimer::new())))
            .unwrap();
        d.control(ControlOp::SetKey {
            even: "1122334455667788".to_string(),
            odd: "8877665544332211".to_string(),
        })
        .unwrap();

        let even_plain = [1u8; 184];
        let odd_plain = [2u8; 184];
        let even_ct = csa_ciphertext("1122334455667788", &even_plain);
        let odd_ct = csa_ciphertext("8877665544332211", &odd_plain);

        for _ in 0..3 {
            d.process(InputItem::Packet(build_packet(
                0x200,
                ScramblingControl::Even,
                &even_ct,
            )));
        }
        // 3 even packets batched, none emitted yet: capacity is larger than 3.
        assert_eq!(d.sink.packets.len(), 0);

        d.process(InputItem::Packet(build_packet(
            0x200,
            ScramblingControl::Odd,
            &odd_ct,
        )));
        // The parity flip flushed the 3 even packets before batching the odd one.
        assert_eq!(d.sink.packets.len(), 3);

        d.on_timer_fire();
        assert_eq!(d.sink.packets.len(), 4);
        let last = d.sink.packets.last().unwrap().bytes();
        assert_eq!(&last[4..4 + 184], &odd_plain[..]);
    }

    // S5: deadline flush with no fill.
    #[test]
    fn s5_deadline_flush() {
        let mut d = new_descrambler(Some(FlowDef::new(
            "block.mpegts.demux",
            Duration::from_millis(5),
        )));
        d.control(ControlOp::AddPid(0x200)).unwrap();
        d.control(ControlOp::AttachTimer(Box::new(ManualDeadlineTimer::new())))
            .unwrap();
        d.control(ControlOp::SetKey {
            even: "1122334455667788".to_string(),
            odd: String::new(),
        })
        .unwrap();

        for i in 0..2u8 {
            let plaintext = [i; 184];
            let ciphertext = csa_ciphertext("1122334455667788", &plaintext);
            d.process(InputItem::Packet(build_packet(
                0x200,
                ScramblingControl::Even,
                &ciphertext,
            )));
        }
        assert_eq!(d.sink.packets.len(), 0);

        d.on_timer_fire();
        assert_eq!(d.sink.packets.len(), 2);
    }

    // spec.md §9: a spurious or already-raced timer callback must not panic.
    #[test]
    fn spurious_timer_fire_with_nothing_pending_is_a_no_op() {
        let mut d = new_descrambler(Some(FlowDef::new(
            "block.mpegts.demux",
            Duration::from_millis(5),
        )));
        d.control(ControlOp::AddPid(0x200)).unwrap();
        d.control(ControlOp::AttachTimer(Box::new(ManualDeadlineTimer::new())))
            .unwrap();
        d.control(ControlOp::SetKey {
            even: "1122334455667788".to_string(),
            odd: String::new(),
        })
        .unwrap();

        // Batch and Hold Queue are both still empty; no self-reference was
        // ever acquired. Must not panic.
        d.on_timer_fire();
        assert_eq!(d.sink.packets.len(), 0);
    }

    // spec.md §9: a timer fire that races a fullness-triggered flush (which
    // already cancelled the timer and released the self-reference) must not
    // panic when it still runs.
    #[test]
    fn timer_fire_racing_a_fullness_flush_is_tolerated() {
        let mut d = new_descrambler(Some(FlowDef::new(
            "block.mpegts.demux",
            Duration::from_millis(5),
        )));
        d.control(ControlOp::AddPid(0x200)).unwrap();
        d.control(ControlOp::AttachTimer(Box::new(ManualDeadlineTimer::new())))
            .unwrap();
        d.control(ControlOp::SetKey {
            even: "1122334455667788".to_string(),
            odd: String::new(),
        })
        .unwrap();

        let n = d.batch.capacity();
        for i in 0..n {
            let plaintext = [i as u8; 184];
            let ciphertext = csa_ciphertext("1122334455667788", &plaintext);
            d.process(InputItem::Packet(build_packet(
                0x200,
                ScramblingControl::Even,
                &ciphertext,
            )));
        }
        // The batch filled and flushed on its own, releasing the
        // self-reference. A timer that fires after losing the race to that
        // flush must be a no-op rather than a panic.
        assert_eq!(d.sink.packets.len(), n);
        d.on_timer_fire();
        assert_eq!(d.sink.packets.len(), n);
    }

    // S6: AES backend.
    #[test]
    fn s6_aes_backend() {
        let mut d = new_descrambler(None);
        d.control(ControlOp::AddPid(0x300)).unwrap();
        d.control(ControlOp::SetKey {
            even: "000102030405060708090a0b0c0d0e0f".to_string(),
            odd: String::new(),
        })
        .unwrap();

        let plaintext = [9u8; 176];
        let key = [0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f];
        let ciphertext = aes_ciphertext(key, &plaintext);
        let packet = build_packet(0x300, ScramblingControl::Even, &ciphertext);
        d.process(InputItem::Packet(packet));

        assert_eq!(d.sink.packets.len(), 1);
        let out = d.sink.packets[0].bytes();
        assert_eq!(&out[4..4 + 176], &plaintext[..]);
    }

    // Invariant 2: cleartext packet passes through byte-identical.
    #[test]
    fn unscrambled_packet_is_byte_identical() {
        let mut d = new_descrambler(None);
        d.control(ControlOp::AddPid(0x100)).unwrap();
        d.control(ControlOp::SetKey {
            even: "1122334455667788".to_string(),
            odd: String::new(),
        })
        .unwrap();
        let packet = build_packet(0x100, ScramblingControl::NotScrambled, &[3u8; 184]);
        let original = packet.bytes();
        d.process(InputItem::Packet(packet));
        assert_eq!(d.sink.packets[0].bytes(), original);
    }

    // Invariant 3: PID not in the configured set passes through unchanged.
    #[test]
    fn unconfigured_pid_is_byte_identical() {
        let mut d = new_descrambler(None);
        d.control(ControlOp::SetKey {
            even: "1122334455667788".to_string(),
            odd: String::new(),
        })
        .unwrap();
        let packet = build_packet(0x999, ScramblingControl::Even, &[4u8; 184]);
        let original = packet.bytes();
        d.process(InputItem::Packet(packet));
        assert_eq!(d.sink.packets[0].bytes(), original);
    }

    // Invariant 9: idempotence over an already-cleartext packet.
    #[test]
    fn idempotent_over_cleartext() {
        let mut d = new_descrambler(None);
        d.control(ControlOp::AddPid(0x100)).unwrap();
        let packet = build_packet(0x100, ScramblingControl::NotScrambled, &[5u8; 184]);
        let original = packet.bytes();
        d.process(InputItem::Packet(packet));
        assert_eq!(d.sink.packets[0].bytes(), original);
    }

    // Invariant 1 / testable property 1: ordering preserved across a
    // control record interleaved mid-batch.
    #[test]
    fn control_record_preserves_order_mid_batch() {
        let mut d = new_descrambler(Some(FlowDef::new(
            "block.mpegts.demux",
            Duration::from_millis(5),
        )));
        d.control(ControlOp::AddPid(0x200)).unwrap();
        d.control(ControlOp::AttachTimer(Box::new(ManualDeadlineTimer::new())))
            .unwrap();
        d.control(ControlOp::SetKey {
            even: "1122334455667788".to_string(),
            odd: String::new(),
        })
        .unwrap();

        let plaintext = [6u8; 184];
        let ciphertext = csa_ciphertext("1122334455667788", &plaintext);
        d.process(InputItem::Packet(build_packet(
            0x200,
            ScramblingControl::Even,
            &ciphertext,
        )));
        // Hold Queue is non-empty now; a SetFlowDef must queue behind it.
        d.control(ControlOp::SetFlowDef(FlowDef::new(
            "block.mpegts.demux",
            Duration::from_millis(1),
        )))
        .unwrap();
        assert!(d.sink.flow_defs.is_empty());

        d.on_timer_fire();
        assert_eq!(d.sink.packets.len(), 1);
        assert_eq!(d.sink.flow_defs.len(), 1);
        // out_latency = in_latency + configured_latency + LATENCY_FLOOR
        assert_eq!(
            d.sink.flow_defs[0].latency,
            Duration::from_millis(1) + Duration::from_millis(5) + LATENCY_FLOOR
        );
    }

    #[test]
    fn set_flow_def_rejects_wrong_prefix() {
        let mut d = new_descrambler(None);
        let err = d
            .control(ControlOp::SetFlowDef(FlowDef::new(
                "block.other.thing",
                Duration::from_millis(0),
            )))
            .unwrap_err();
        assert_eq!(err, ControlError::InvalidFlow);
    }

    #[test]
    fn csa_bs_without_timer_is_rejected() {
        let mut d = new_descrambler(Some(FlowDef::new(
            "block.mpegts.demux",
            Duration::from_millis(5),
        )));
        let err = d
            .control(ControlOp::SetKey {
                even: "1122334455667788".to_string(),
                odd: String::new(),
            })
            .unwrap_err();
        assert_eq!(err, ControlError::BackendUnavailable);
    }
}

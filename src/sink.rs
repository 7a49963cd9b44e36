//! The downstream sink collaborator (spec.md §1, §6).
//!
//! Pushing packets and flow definitions onward is the embedder's job; this
//! crate only ever calls through the trait, never owning a concrete
//! transport.

use crate::packet::{FlowDef, Packet};

/// Everything downstream of the descrambler. Both methods take `&mut self`
/// since a real sink typically wraps a socket, ring buffer, or channel
/// handle.
pub trait Sink {
    fn emit_packet(&mut self, packet: Packet);
    fn emit_flow_def(&mut self, flow_def: FlowDef);
}

/// A [`Sink`] that records everything it receives, for test assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub packets: Vec<Packet>,
    pub flow_defs: Vec<FlowDef>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Sink for RecordingSink {
    fn emit_packet(&mut self, packet: Packet) {
        self.packets.push(packet);
    }

    fn emit_flow_def(&mut self, flow_def: FlowDef) {
        self.flow_defs.push(flow_def);
    }
}

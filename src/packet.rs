//! The packet and flow-definition data model (spec.md §3).

use crate::error::DropReason;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Owning storage for one 188-byte TS packet. Shared (`Rc`) because the
/// same buffer may be referenced both from the Hold Queue (via [`Packet`])
/// and from the Batch Buffer (via a [`crate::batch::BatchItem`]) while a
/// batch is in flight; `RefCell` provides the interior mutability needed to
/// decrypt a payload in place through either path.
pub type PacketBuf = Rc<RefCell<[u8; 188]>>;

/// An owned reference to a 188-byte buffer plus the metadata the core
/// itself cares about (spec.md §3 Packet).
#[derive(Debug, Clone)]
pub struct Packet {
    buf: PacketBuf,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// Caller-defined flow tag, passed through untouched.
    pub flow_id: u32,
}

impl Packet {
    pub fn new(data: [u8; 188]) -> Self {
        Self {
            buf: Rc::new(RefCell::new(data)),
            pts: None,
            dts: None,
            flow_id: 0,
        }
    }

    /// Build a packet sharing another's buffer (for tests exercising the
    /// copy-on-write path against an aliased buffer).
    pub fn share(&self) -> Self {
        Self {
            buf: Rc::clone(&self.buf),
            pts: self.pts,
            dts: self.dts,
            flow_id: self.flow_id,
        }
    }

    pub(crate) fn buf(&self) -> &PacketBuf {
        &self.buf
    }

    /// Copy the packet's buffer into a fresh, uniquely-owned allocation if
    /// it is currently shared with any other consumer (spec.md §4.3 step 4,
    /// §5). A no-op when this packet already holds the only reference.
    pub(crate) fn make_exclusive(&mut self) -> Result<(), DropReason> {
        if Rc::strong_count(&self.buf) > 1 {
            let copy = *self.buf.borrow();
            self.buf = Rc::new(RefCell::new(copy));
        }
        Ok(())
    }

    /// First 5 header bytes, for [`crate::header::decode`].
    pub(crate) fn header_bytes(&self) -> [u8; 5] {
        let data = self.buf.borrow();
        let mut out = [0u8; 5];
        out.copy_from_slice(&data[0..5]);
        out
    }

    pub(crate) fn with_bytes_mut<R>(&mut self, f: impl FnOnce(&mut [u8; 188]) -> R) -> R {
        let mut data = self.buf.borrow_mut();
        f(&mut data)
    }

    #[cfg(test)]
    pub(crate) fn bytes(&self) -> [u8; 188] {
        *self.buf.borrow()
    }
}

/// A flow-format declaration, either announced by the embedder at
/// construction, flowing in-band as a [`ControlRecord`], or republished
/// downstream with updated latency (spec.md §3, §6).
#[derive(Debug, Clone)]
pub struct FlowDef {
    /// Must match the prefix `block.mpegts.` to be accepted by `SetFlowDef`.
    pub name: String,
    /// Latency already accumulated upstream of this pipe.
    pub latency: Duration,
}

impl FlowDef {
    pub const REQUIRED_PREFIX: &'static str = "block.mpegts.";

    pub fn new(name: impl Into<String>, latency: Duration) -> Self {
        Self {
            name: name.into(),
            latency,
        }
    }

    pub(crate) fn matches_required_prefix(&self) -> bool {
        self.name.starts_with(Self::REQUIRED_PREFIX)
    }
}

/// An in-band flow-definition announcement (spec.md §3 ControlRecord).
#[derive(Debug, Clone)]
pub struct ControlRecord {
    pub flow_def: FlowDef,
}

/// One item from the input stream: either a packet or an interleaved
/// control record (spec.md §3 HoldQueue).
#[derive(Debug, Clone)]
pub enum InputItem {
    Packet(Packet),
    Control(ControlRecord),
}

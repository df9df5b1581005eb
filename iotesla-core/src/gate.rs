use log::warn;

/// Why the gate stopped admitting writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchReason {
    /// Free space was not larger than one record.
    CapacityExhausted,

    /// A write stored fewer bytes than requested.
    WriteSizeMismatch,
}

impl core::fmt::Display for LatchReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LatchReason::CapacityExhausted => write!(f, "capacity exhausted"),
            LatchReason::WriteSizeMismatch => write!(f, "short write"),
        }
    }
}

/// Latch state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GateState {
    /// Writes are admitted while there is room.
    #[default]
    Open,

    /// No writes until [`CapacityGate::reset`].
    Latched(LatchReason),
}

/// Gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Reject,
}

/// One-way gate in front of the append log.
///
/// Once latched it stays latched, whatever the storage reports later, so a
/// failing flash is not written to over and over.
#[derive(Debug, Default)]
pub struct CapacityGate {
    state: GateState,
}

impl CapacityGate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a write of `required_bytes` may go ahead.
    ///
    /// # Arguments
    /// * `required_bytes` - Size of the write.
    /// * `free_bytes` - Free space currently reported by the storage.
    ///
    /// # Returns
    /// * `Admission` - `Reject` when latched or when `free_bytes` is not
    ///   strictly greater than `required_bytes`.
    pub fn check(&mut self, required_bytes: u64, free_bytes: u64) -> Admission {
        if self.is_latched() {
            return Admission::Reject;
        }

        if free_bytes <= required_bytes {
            self.latch(LatchReason::CapacityExhausted);
            return Admission::Reject;
        }

        Admission::Admit
    }

    /// Latch the gate. The first reason wins.
    pub fn latch(&mut self, reason: LatchReason) {
        if let GateState::Open = self.state {
            warn!("Memory is full ({reason}), further records are dropped");
            self.state = GateState::Latched(reason);
        }
    }

    /// Open the gate again.
    pub fn reset(&mut self) {
        self.state = GateState::Open;
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_latched(&self) -> bool {
        matches!(self.state, GateState::Latched(_))
    }
}

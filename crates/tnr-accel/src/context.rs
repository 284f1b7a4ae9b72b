//! Accelerator device: capability set, resource ledger and fault plan.
//!
//! # Resource ledger
//!
//! Every stream, image and payload registers with the device when it is
//! created and deregisters exactly once when its last handle drops.  The
//! ledger is lock-free on the hot path and can be snapshotted at any time,
//! which makes "released exactly once" an observable property.
//!
//! # Fault plan
//!
//! A device can be built with a list of [`FaultPoint`]s.  The n-th occurrence
//! of a planned point fails with the planned status instead of proceeding.
//! Creation and submission faults surface synchronously to the caller;
//! execution faults surface at the next [`Stream::sync`](crate::Stream::sync).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use tnr_core::backend::CapabilitySet;
use tnr_core::error::{EngineError, Result, Status};

// ─── Kinds ───────────────────────────────────────────────────────────────────

/// Accelerator objects tracked by the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Stream,
    Image,
    Payload,
}

impl ResourceKind {
    const fn index(self) -> usize {
        match self {
            Self::Stream => 0,
            Self::Image => 1,
            Self::Payload => 2,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => f.write_str("stream"),
            Self::Image => f.write_str("image"),
            Self::Payload => f.write_str("payload"),
        }
    }
}

/// Operations that can be submitted to a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    ConvertImageFormat,
    TemporalNoiseReduction,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConvertImageFormat => f.write_str("convert_image_format"),
            Self::TemporalNoiseReduction => f.write_str("temporal_noise_reduction"),
        }
    }
}

/// A point in the runtime where a planned fault can be injected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Creation of a resource of this kind.
    Create(ResourceKind),
    /// Submission of an operation (fails synchronously).
    Submit(OpKind),
    /// Execution of an operation on the stream worker (fails at sync).
    Execute(OpKind),
}

#[derive(Clone, Copy, Debug)]
struct PlannedFault {
    point: FaultPoint,
    /// 1-based occurrence that fails.
    nth: u64,
    status: Status,
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

struct ResourceLedger {
    created: [AtomicU64; 3],
    released: [AtomicU64; 3],
}

impl ResourceLedger {
    const fn new() -> Self {
        Self {
            created: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            released: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    #[inline]
    fn on_create(&self, kind: ResourceKind) {
        self.created[kind.index()].fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    fn on_release(&self, kind: ResourceKind) {
        self.released[kind.index()].fetch_add(1, Ordering::AcqRel);
    }

    fn counts(&self, kind: ResourceKind) -> KindCounts {
        KindCounts {
            created: self.created[kind.index()].load(Ordering::Acquire),
            released: self.released[kind.index()].load(Ordering::Acquire),
        }
    }
}

/// Created/released counters for one [`ResourceKind`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub created: u64,
    pub released: u64,
}

impl KindCounts {
    pub fn live(self) -> u64 {
        self.created.saturating_sub(self.released)
    }
}

/// Point-in-time copy of the device's resource ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub streams: KindCounts,
    pub images: KindCounts,
    pub payloads: KindCounts,
}

impl LedgerSnapshot {
    /// Resources created and not yet released, across all kinds.
    pub fn live(&self) -> u64 {
        self.streams.live() + self.images.live() + self.payloads.live()
    }

    /// Total resources ever created, across all kinds.
    pub fn created(&self) -> u64 {
        self.streams.created + self.images.created + self.payloads.created
    }

    /// `true` when every created resource was released exactly once.
    pub fn is_balanced(&self) -> bool {
        [self.streams, self.images, self.payloads]
            .iter()
            .all(|k| k.created == k.released)
    }
}

// ─── Device ──────────────────────────────────────────────────────────────────

/// Long-lived accelerator device shared by every resource of a run.
pub struct Device {
    capabilities: CapabilitySet,
    ledger: ResourceLedger,
    next_id: AtomicU64,
    faults: Vec<PlannedFault>,
    occurrences: Mutex<HashMap<FaultPoint, u64>>,
}

impl Device {
    /// Host device exposing every backend, with no planned faults.
    pub fn host() -> Arc<Self> {
        Self::builder().build()
    }

    pub fn builder() -> DeviceBuilder {
        DeviceBuilder {
            capabilities: CapabilitySet::ALL,
            faults: Vec::new(),
        }
    }

    /// Backends this device can execute.
    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn ledger(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            streams: self.ledger.counts(ResourceKind::Stream),
            images: self.ledger.counts(ResourceKind::Image),
            payloads: self.ledger.counts(ResourceKind::Payload),
        }
    }

    /// Register a new resource and return its id.
    pub(crate) fn register(&self, kind: ResourceKind) -> Result<u64> {
        self.check_fault(FaultPoint::Create(kind))?;
        self.ledger.on_create(kind);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(%kind, id, "Accelerator resource created");
        Ok(id)
    }

    pub(crate) fn deregister(&self, kind: ResourceKind, id: u64) {
        self.ledger.on_release(kind);
        debug!(%kind, id, "Accelerator resource released");
    }

    /// Count one occurrence of `point` and fail if the plan says so.
    pub(crate) fn check_fault(&self, point: FaultPoint) -> Result<()> {
        if self.faults.is_empty() {
            return Ok(());
        }
        let occurrence = {
            let mut seen = self
                .occurrences
                .lock()
                .map_err(|_| EngineError::accelerator(Status::InternalError, "fault table poisoned"))?;
            let count = seen.entry(point).or_insert(0);
            *count += 1;
            *count
        };
        match self
            .faults
            .iter()
            .find(|f| f.point == point && f.nth == occurrence)
        {
            Some(fault) => Err(EngineError::accelerator(
                fault.status,
                format!("injected fault at {point:?} (occurrence {occurrence})"),
            )),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("capabilities", &self.capabilities)
            .field("ledger", &self.ledger())
            .field("planned_faults", &self.faults.len())
            .finish()
    }
}

/// Builder for a [`Device`] with restricted capabilities or planned faults.
#[derive(Debug)]
pub struct DeviceBuilder {
    capabilities: CapabilitySet,
    faults: Vec<PlannedFault>,
}

impl DeviceBuilder {
    /// Restrict the backends the device exposes.
    pub fn capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Fail the `nth` (1-based) occurrence of `point` with `status`.
    pub fn fail_at(mut self, point: FaultPoint, nth: u64, status: Status) -> Self {
        self.faults.push(PlannedFault { point, nth, status });
        self
    }

    pub fn build(self) -> Arc<Device> {
        info!(
            capabilities = %self.capabilities,
            planned_faults = self.faults.len(),
            "Accelerator device ready"
        );
        Arc::new(Device {
            capabilities: self.capabilities,
            ledger: ResourceLedger::new(),
            next_id: AtomicU64::new(0),
            faults: self.faults,
            occurrences: Mutex::new(HashMap::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tnr_core::backend::Backend;

    #[test]
    fn ledger_tracks_create_and_release() {
        let device = Device::host();
        let a = device.register(ResourceKind::Image).unwrap();
        let b = device.register(ResourceKind::Image).unwrap();
        assert_ne!(a, b);
        assert_eq!(device.ledger().images.live(), 2);

        device.deregister(ResourceKind::Image, a);
        device.deregister(ResourceKind::Image, b);
        let snap = device.ledger();
        assert_eq!(snap.images, KindCounts { created: 2, released: 2 });
        assert!(snap.is_balanced());
    }

    #[test]
    fn planned_fault_hits_only_the_nth_occurrence() {
        let device = Device::builder()
            .fail_at(FaultPoint::Create(ResourceKind::Image), 2, Status::OutOfMemory)
            .build();

        assert!(device.register(ResourceKind::Image).is_ok());
        let err = device.register(ResourceKind::Image).unwrap_err();
        assert_eq!(err.status(), Some(Status::OutOfMemory));
        assert!(device.register(ResourceKind::Image).is_ok());
        // Failed creations never reach the ledger.
        assert_eq!(device.ledger().images.created, 2);
    }

    #[test]
    fn builder_restricts_capabilities() {
        let device = Device::builder()
            .capabilities(CapabilitySet::only(Backend::Cuda))
            .build();
        assert!(device.capabilities().contains(Backend::Cuda));
        assert!(!device.capabilities().contains(Backend::Vic));
    }
}

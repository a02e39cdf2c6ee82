//! Device: shared, disconnect-aware transfer state for one attached unit.
//!
//! A [`Device`] is always held in an `Arc`: the registry keeps one strong
//! reference until disconnect, every open [`Handle`](crate::lifecycle::Handle)
//! keeps another. It is destroyed when the last one goes away, which releases
//! the transport.
//!
//! Two locks guard its state:
//!
//! - `state` (the long-lived lock) serializes reads against each other and
//!   against disconnect. A read holds it for its whole duration, including
//!   while blocked.
//! - `shared` (the completion lock) guards the buffer, the pending request
//!   and the last error. The completion handler only ever takes this one,
//!   and only for a short copy-and-notify section. `waiters` is paired with it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;

use crate::lifecycle::DisconnectPolicy;
use crate::transfer::{Completion, PendingRequest, TransferBuffer};
use crate::transport::{CompletionFn, Transport, TransportError};

// ── Error type ──

/// Errors surfaced to callers of open and read.
///
/// String payloads follow the convention **"context: details"** where *context*
/// identifies the operation or step (e.g. `"submit"`, `"claim interface 1"`)
/// and *details* describes what went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// No device is published under the requested node.
    NotFound,
    /// The activity token could not be taken.
    Busy(String),
    /// A submission failed, or a transfer completed with an error code.
    Io { code: i32, detail: String },
    /// The device was disconnected. Terminal for the handle.
    NoDevice,
    /// Non-blocking read with no data ready.
    WouldBlock,
    /// A blocked read was interrupted.
    Interrupted,
    OpenFailed(String),
    InitFailed(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NotFound => write!(f, "Device not found"),
            DeviceError::Busy(e) => write!(f, "Device busy: {e}"),
            DeviceError::Io { code, detail } => write!(f, "I/O error {code}: {detail}"),
            DeviceError::NoDevice => write!(f, "Device disconnected"),
            DeviceError::WouldBlock => write!(f, "No data available (would block)"),
            DeviceError::Interrupted => write!(f, "Read interrupted"),
            DeviceError::OpenFailed(e) => write!(f, "Failed to open device: {e}"),
            DeviceError::InitFailed(e) => write!(f, "Device init failed: {e}"),
        }
    }
}

impl std::error::Error for DeviceError {}

impl From<TransportError> for DeviceError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Busy(detail) => DeviceError::Busy(detail),
            TransportError::Disconnected => DeviceError::NoDevice,
            e @ TransportError::Failed { .. } => DeviceError::Io {
                code: e.code(),
                detail: e.to_string(),
            },
        }
    }
}

impl From<DeviceError> for std::io::Error {
    fn from(e: DeviceError) -> Self {
        use std::io::ErrorKind;
        let kind = match e {
            DeviceError::NotFound => ErrorKind::NotFound,
            DeviceError::NoDevice => ErrorKind::NotConnected,
            DeviceError::WouldBlock => ErrorKind::WouldBlock,
            DeviceError::Interrupted => ErrorKind::Interrupted,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, e)
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;

// ── Device info ──

/// Identity and endpoint geometry, fixed at attach time.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    /// Bus location, e.g. `usb:001/004`.
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: String,
    pub serial: Option<String>,
    /// Bulk-in endpoint address.
    pub endpoint: u8,
    /// Max chunk size of the bulk-in endpoint (its max packet size).
    pub capacity: usize,
}

/// Blocking behavior of a single read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    #[default]
    Blocking,
    NonBlocking,
}

/// Point-in-time view of the transfer state, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSnapshot {
    pub capacity: usize,
    pub filled_len: usize,
    pub consumed_len: usize,
    pub in_flight: bool,
    pub last_error: Option<i32>,
}

// ── Device ──

#[derive(Debug, Default)]
pub(crate) struct DeviceState {
    pub(crate) disconnected: bool,
}

#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) buffer: TransferBuffer,
    pub(crate) pending: PendingRequest,
    pub(crate) last_error: Option<i32>,
    /// Set by a cancelling disconnect so blocked readers can bail out
    /// without waiting for `state`.
    pub(crate) detached: bool,
    /// A read owns the device; others queue on `waiters`.
    pub(crate) reading: bool,
}

pub struct Device {
    info: DeviceInfo,
    transport: Box<dyn Transport>,
    pub(crate) state: Mutex<DeviceState>,
    pub(crate) shared: Mutex<Shared>,
    pub(crate) waiters: Condvar,
    this: Weak<Device>,
}

impl Device {
    /// Wrap an initialized transport. The returned reference is the one the
    /// attachment layer hands to the registry.
    pub fn new(info: DeviceInfo, transport: Box<dyn Transport>) -> Arc<Self> {
        Arc::new_cyclic(|this| Device {
            shared: Mutex::new(Shared {
                buffer: TransferBuffer::new(info.capacity),
                pending: PendingRequest::default(),
                last_error: None,
                detached: false,
                reading: false,
            }),
            info,
            transport,
            state: Mutex::new(DeviceState::default()),
            waiters: Condvar::new(),
            this: this.clone(),
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        let shared = self.lock_shared();
        TransferSnapshot {
            capacity: shared.buffer.capacity(),
            filled_len: shared.buffer.filled_len(),
            consumed_len: shared.buffer.consumed_len(),
            in_flight: shared.pending.in_flight(),
            last_error: shared.last_error,
        }
    }

    /// Submit a bulk-in transfer of `min(len, capacity)` bytes.
    ///
    /// No-op if a transfer is already outstanding. Must be called without
    /// holding `shared`: the transport may complete inline.
    pub(crate) fn submit(&self, len: usize) -> Result<()> {
        let len = len.min(self.info.capacity);
        {
            let mut shared = self.lock_shared();
            if shared.pending.in_flight() {
                return Ok(());
            }
            shared.buffer.reset();
            shared.pending.begin();
        }

        let device = self.this.clone();
        let on_complete: CompletionFn = Box::new(move |completion| {
            if let Some(device) = device.upgrade() {
                device.complete(completion);
            }
        });

        log::debug!(
            "{}: submit bulk-in 0x{:02x} ({len} bytes)",
            self.info.path,
            self.info.endpoint
        );
        if let Err(e) = self
            .transport
            .submit_bulk_in(self.info.endpoint, len, on_complete)
        {
            self.lock_shared().pending.abandon();
            return Err(DeviceError::Io {
                code: e.code(),
                detail: format!("submit: {e}"),
            });
        }
        Ok(())
    }

    /// Completion handler. Runs in the transport's context and only takes
    /// the completion lock.
    pub(crate) fn complete(&self, completion: Completion) {
        let status = completion.status;
        let stored = {
            let mut shared = self.lock_shared();
            if let Some(code) = status.error_code() {
                shared.last_error = Some(code);
            }
            let stored = shared.buffer.fill(&completion.data);
            shared.pending.finish();
            self.waiters.notify_all();
            stored
        };
        if status.is_benign() {
            log::debug!(
                "{}: bulk-in {status}, {stored} bytes, no error recorded",
                self.info.path
            );
        } else if status.error_code().is_some() {
            log::warn!("{}: bulk-in failed: {status}", self.info.path);
        } else {
            log::debug!("{}: bulk-in complete, {stored} bytes", self.info.path);
        }
    }

    /// Raise `flag` and wake every blocked reader so the owner of the flag
    /// can observe it.
    pub(crate) fn interrupt(&self, flag: &AtomicBool) {
        let _shared = self.lock_shared();
        flag.store(true, Ordering::Release);
        self.waiters.notify_all();
    }

    /// Mark the device gone. Never reverts.
    pub(crate) fn mark_disconnected(&self, policy: DisconnectPolicy) {
        if policy == DisconnectPolicy::CancelAndWake {
            {
                let mut shared = self.lock_shared();
                shared.detached = true;
                self.waiters.notify_all();
            }
            self.transport.cancel_in_flight();
        }
        self.lock_state().disconnected = true;
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("info", &self.info)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::info!("{}: released", self.info.path);
        self.transport.cancel_in_flight();
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::mock_device;
    use super::*;
    use crate::transport::mock::MockTransport;

    #[test]
    fn submit_clamps_to_capacity_and_resets_cursors() {
        let (dev, mock) = mock_device(64);
        dev.submit(100).unwrap();
        assert_eq!(mock.submissions(), vec![64]);
        assert_eq!(mock.endpoints(), vec![0x83]);
        let snap = dev.snapshot();
        assert!(snap.in_flight);
        assert_eq!(snap.filled_len, 0);
        assert_eq!(snap.consumed_len, 0);
    }

    #[test]
    fn second_submit_while_in_flight_is_noop() {
        let (dev, mock) = mock_device(64);
        dev.submit(10).unwrap();
        dev.submit(10).unwrap();
        assert_eq!(mock.submissions().len(), 1);
        assert_eq!(mock.max_in_flight(), 1);
    }

    #[test]
    fn failed_submit_rolls_back_in_flight() {
        let (dev, mock) = mock_device(64);
        mock.fail_next_submit(TransportError::Failed {
            code: 12,
            detail: "no memory".into(),
        });
        let err = dev.submit(10).unwrap_err();
        assert!(matches!(err, DeviceError::Io { code: 12, .. }));
        assert!(!dev.snapshot().in_flight);
    }

    #[test]
    fn completion_fills_buffer_and_clears_in_flight() {
        let (dev, mock) = mock_device(8);
        dev.submit(8).unwrap();
        mock.complete(Completion::ok(vec![1, 2, 3]));
        let snap = dev.snapshot();
        assert!(!snap.in_flight);
        assert_eq!(snap.filled_len, 3);
        assert_eq!(snap.last_error, None);
    }

    #[test]
    fn completion_error_recorded_benign_ignored() {
        let (dev, mock) = mock_device(8);
        dev.submit(8).unwrap();
        mock.complete(Completion::error(32));
        assert_eq!(dev.snapshot().last_error, Some(32));

        dev.lock_shared().last_error = None;
        dev.submit(8).unwrap();
        mock.complete(Completion::cancelled());
        dev.submit(8).unwrap();
        mock.complete(Completion::aborted());
        assert_eq!(dev.snapshot().last_error, None);
    }

    #[test]
    fn completion_after_drop_is_ignored() {
        let mock = MockTransport::new();
        let dev = Device::new(test_support::info(8), Box::new(mock.clone()));
        let weak = Arc::downgrade(&dev);
        dev.submit(8).unwrap();
        drop(dev);
        assert!(weak.upgrade().is_none());
        // Drop cancelled the pending transfer; nothing left to complete.
        assert!(!mock.complete(Completion::ok(vec![1])));
        assert_eq!(mock.cancel_count(), 1);
    }

    #[test]
    fn cancelling_disconnect_sets_flags_and_cancels() {
        let (dev, mock) = mock_device(8);
        dev.submit(8).unwrap();
        dev.mark_disconnected(DisconnectPolicy::CancelAndWake);
        assert!(dev.lock_state().disconnected);
        assert!(dev.lock_shared().detached);
        assert_eq!(mock.cancel_count(), 1);
        assert!(!dev.snapshot().in_flight);
    }

    #[test]
    fn waiting_disconnect_leaves_transfer_alone() {
        let (dev, mock) = mock_device(8);
        dev.submit(8).unwrap();
        dev.mark_disconnected(DisconnectPolicy::WaitForCompletion);
        assert!(dev.lock_state().disconnected);
        assert!(!dev.lock_shared().detached);
        assert_eq!(mock.cancel_count(), 0);
        assert!(dev.snapshot().in_flight);
    }

    #[test]
    fn transport_error_conversion() {
        assert!(matches!(
            DeviceError::from(TransportError::Busy("claimed".into())),
            DeviceError::Busy(_)
        ));
        assert_eq!(
            DeviceError::from(TransportError::Disconnected),
            DeviceError::NoDevice
        );
        assert!(matches!(
            DeviceError::from(TransportError::Failed {
                code: 5,
                detail: "x".into()
            }),
            DeviceError::Io { code: 5, .. }
        ));
    }

    #[test]
    fn io_error_kinds() {
        use std::io::ErrorKind;
        let kind = |e: DeviceError| std::io::Error::from(e).kind();
        assert_eq!(kind(DeviceError::WouldBlock), ErrorKind::WouldBlock);
        assert_eq!(kind(DeviceError::Interrupted), ErrorKind::Interrupted);
        assert_eq!(kind(DeviceError::NoDevice), ErrorKind::NotConnected);
        assert_eq!(kind(DeviceError::NotFound), ErrorKind::NotFound);
        assert_eq!(
            kind(DeviceError::Io {
                code: 5,
                detail: "x".into()
            }),
            ErrorKind::Other
        );
    }

    #[test]
    fn display_messages() {
        assert_eq!(DeviceError::NotFound.to_string(), "Device not found");
        assert_eq!(
            DeviceError::Io {
                code: 5,
                detail: "I/O error".into()
            }
            .to_string(),
            "I/O error 5: I/O error"
        );
        assert_eq!(
            DeviceError::InitFailed("SET_LINE_CODING: stall".into()).to_string(),
            "Device init failed: SET_LINE_CODING: stall"
        );
    }
}

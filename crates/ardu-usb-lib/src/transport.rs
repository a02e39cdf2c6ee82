//! Transport abstraction: asynchronous bulk-in submission + activity tokens.
//!
//! A [`Transport`] owns the connection to one attached device. The read
//! pipeline submits at most one bulk-in transfer at a time and is notified
//! through a [`CompletionFn`] invoked from the transport's own execution
//! context (a worker thread on Linux, the test thread for the mock).

use std::fmt;

use crate::protocol::{EBUSY, ENODEV};
use crate::transfer::Completion;

// ── Error type ──

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The device or interface is held by someone else.
    Busy(String),
    /// Submission or activation failed with an errno-style code.
    Failed { code: i32, detail: String },
    /// The device is gone.
    Disconnected,
}

impl TransportError {
    /// Errno-style code for this error.
    pub fn code(&self) -> i32 {
        match self {
            TransportError::Busy(_) => EBUSY,
            TransportError::Failed { code, .. } => *code,
            TransportError::Disconnected => ENODEV,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Busy(e) => write!(f, "busy: {e}"),
            TransportError::Failed { code, detail } => write!(f, "{detail} (code {code})"),
            TransportError::Disconnected => write!(f, "device disconnected"),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

// ── Trait ──

/// Completion callback for one bulk-in transfer.
///
/// Called exactly once per accepted submission, from an arbitrary thread.
pub type CompletionFn = Box<dyn FnOnce(Completion) + Send + 'static>;

pub trait Transport: Send + Sync {
    /// Queue a bulk-in transfer of up to `len` bytes on `endpoint`.
    ///
    /// Returns once the transfer is queued; `on_complete` runs later. It may
    /// also run before this call returns, so callers must not hold locks the
    /// completion handler needs.
    fn submit_bulk_in(&self, endpoint: u8, len: usize, on_complete: CompletionFn) -> Result<()>;

    /// Best-effort cancellation of the outstanding transfer, if any.
    ///
    /// The cancelled transfer still completes, with a benign status.
    fn cancel_in_flight(&self);

    /// Take an activity token, keeping the device awake while a handle is open.
    fn acquire_activity(&self) -> Result<()>;

    /// Return a token taken by [`acquire_activity`](Self::acquire_activity).
    fn release_activity(&self);
}

// ── Linux implementation ──

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    use futures_channel::oneshot;
    use nusb::transfer::{RequestBuffer, TransferError};

    use crate::protocol::{EIO, EPIPE, EPROTO};
    use crate::transfer::TransferStatus;

    /// nusb-backed transport for one device.
    ///
    /// The activity token maps onto the claim of the data interface: the
    /// first token claims it (detaching a bound kernel driver), the last
    /// release drops the claim so the host may suspend the device.
    pub struct NusbTransport {
        device: nusb::Device,
        data_interface: u8,
        activity: Mutex<Activity>,
        /// Sending on (or dropping) this cancels the outstanding transfer.
        cancel: Mutex<Option<oneshot::Sender<()>>>,
        /// Set once a transfer reports the device gone; later submissions
        /// fail up front instead of queueing transfers that abort at once.
        gone: Arc<AtomicBool>,
    }

    #[derive(Default)]
    struct Activity {
        tokens: usize,
        interface: Option<nusb::Interface>,
    }

    fn map_status(status: std::result::Result<(), TransferError>) -> TransferStatus {
        match status {
            Ok(()) => TransferStatus::Ok,
            Err(TransferError::Cancelled) => TransferStatus::Cancelled,
            Err(TransferError::Disconnected) => TransferStatus::Aborted,
            Err(TransferError::Stall) => TransferStatus::Error(EPIPE),
            Err(TransferError::Fault) => TransferStatus::Error(EPROTO),
            Err(_) => TransferStatus::Error(EIO),
        }
    }

    /// Drive `transfer` until it finishes or `cancel` fires. A dropped
    /// sender counts as cancellation.
    ///
    /// Dropping the transfer future on cancellation cancels the URB.
    async fn until_cancelled<F: Future>(
        transfer: F,
        cancel: oneshot::Receiver<()>,
    ) -> Option<F::Output> {
        futures_lite::future::or(async { Some(transfer.await) }, async {
            let _ = cancel.await;
            None
        })
        .await
    }

    impl NusbTransport {
        pub fn new(device: nusb::Device, data_interface: u8) -> Self {
            Self {
                device,
                data_interface,
                activity: Mutex::new(Activity::default()),
                cancel: Mutex::new(None),
                gone: Arc::new(AtomicBool::new(false)),
            }
        }

        fn claimed_interface(&self) -> Result<nusb::Interface> {
            let activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
            activity
                .interface
                .clone()
                .ok_or_else(|| TransportError::Failed {
                    code: EIO,
                    detail: format!("interface {} not claimed", self.data_interface),
                })
        }
    }

    impl Transport for NusbTransport {
        fn submit_bulk_in(
            &self,
            endpoint: u8,
            len: usize,
            on_complete: CompletionFn,
        ) -> Result<()> {
            if self.gone.load(Ordering::Acquire) {
                return Err(TransportError::Disconnected);
            }
            let interface = self.claimed_interface()?;
            let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
            let gone = self.gone.clone();
            // The previous transfer has completed by now; replacing its
            // sender cancels nothing.
            *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel_tx);

            let transfer = interface.bulk_in(endpoint, RequestBuffer::new(len));
            std::thread::Builder::new()
                .name(format!("bulk-in-0x{endpoint:02x}"))
                .spawn(move || {
                    let done = futures_lite::future::block_on(until_cancelled(transfer, cancel_rx));
                    if let Some(c) = &done
                        && let Err(TransferError::Disconnected) = c.status
                    {
                        gone.store(true, Ordering::Release);
                    }
                    let completion = match done {
                        Some(c) => Completion {
                            status: map_status(c.status),
                            data: c.data,
                        },
                        None => Completion::cancelled(),
                    };
                    on_complete(completion);
                })
                .map_err(|e| TransportError::Failed {
                    code: EIO,
                    detail: format!("spawn completion thread: {e}"),
                })?;
            Ok(())
        }

        fn cancel_in_flight(&self) {
            if let Some(cancel) = self
                .cancel
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                let _ = cancel.send(());
            }
        }

        fn acquire_activity(&self) -> Result<()> {
            let mut activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
            if activity.tokens == 0 {
                let interface = self
                    .device
                    .detach_and_claim_interface(self.data_interface)
                    .map_err(|e| {
                        TransportError::Busy(format!(
                            "claim interface {}: {e}",
                            self.data_interface
                        ))
                    })?;
                activity.interface = Some(interface);
            }
            activity.tokens += 1;
            Ok(())
        }

        fn release_activity(&self) {
            let mut activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
            activity.tokens = activity.tokens.saturating_sub(1);
            if activity.tokens == 0 {
                activity.interface = None;
            }
        }
    }

    impl Drop for NusbTransport {
        fn drop(&mut self) {
            self.cancel_in_flight();
        }
    }

}

#[cfg(target_os = "linux")]
pub use linux_impl::NusbTransport;

// ── Mock transport for testing ──

/// Scriptable in-memory transport for unit and integration tests.
///
/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
    use std::time::{Duration, Instant};

    /// Cloneable handle to shared mock state: give one clone to the device,
    /// keep another in the test to drive completions.
    ///
    /// Submissions stay pending until [`complete`](Self::complete) is called,
    /// unless a completion was queued with [`script`](Self::script), in which
    /// case it is delivered inline from `submit_bulk_in`.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        shared: Arc<MockShared>,
    }

    #[derive(Default)]
    struct MockShared {
        inner: Mutex<MockInner>,
        changed: Condvar,
    }

    #[derive(Default)]
    struct MockInner {
        pending: VecDeque<(usize, CompletionFn)>,
        scripted: VecDeque<Completion>,
        /// Requested length of every accepted submission.
        submissions: Vec<usize>,
        endpoints: Vec<u8>,
        max_in_flight: usize,
        tokens: usize,
        cancels: usize,
        fail_acquire: Option<TransportError>,
        fail_submit: Option<TransportError>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, MockInner> {
            self.shared
                .inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        }

        /// Queue a completion delivered inline by the next submission.
        pub fn script(&self, completion: Completion) {
            self.lock().scripted.push_back(completion);
        }

        /// Complete the oldest pending transfer. Returns `false` if none is pending.
        ///
        /// Data beyond the requested length is dropped, as a real endpoint
        /// never returns more than was asked for.
        pub fn complete(&self, mut completion: Completion) -> bool {
            let next = self.lock().pending.pop_front();
            match next {
                Some((len, on_complete)) => {
                    completion.data.truncate(len);
                    on_complete(completion);
                    true
                }
                None => false,
            }
        }

        /// Block until at least `count` submissions were accepted, or `timeout` elapses.
        pub fn wait_for_submissions(&self, count: usize, timeout: Duration) -> bool {
            let deadline = Instant::now() + timeout;
            let mut inner = self.lock();
            while inner.submissions.len() < count {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                inner = self
                    .shared
                    .changed
                    .wait_timeout(inner, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            true
        }

        /// Requested length of the oldest pending transfer.
        pub fn pending_len(&self) -> Option<usize> {
            self.lock().pending.front().map(|(len, _)| *len)
        }

        /// Requested lengths of all accepted submissions, in order.
        pub fn submissions(&self) -> Vec<usize> {
            self.lock().submissions.clone()
        }

        /// Endpoints of all accepted submissions, in order.
        pub fn endpoints(&self) -> Vec<u8> {
            self.lock().endpoints.clone()
        }

        /// Highest number of simultaneously pending transfers seen.
        pub fn max_in_flight(&self) -> usize {
            self.lock().max_in_flight
        }

        /// Activity tokens currently held.
        pub fn active_tokens(&self) -> usize {
            self.lock().tokens
        }

        /// Number of `cancel_in_flight` calls.
        pub fn cancel_count(&self) -> usize {
            self.lock().cancels
        }

        /// Make the next `acquire_activity` fail with `err`.
        pub fn fail_next_acquire(&self, err: TransportError) {
            self.lock().fail_acquire = Some(err);
        }

        /// Make the next `submit_bulk_in` fail with `err`.
        pub fn fail_next_submit(&self, err: TransportError) {
            self.lock().fail_submit = Some(err);
        }
    }

    impl Transport for MockTransport {
        fn submit_bulk_in(
            &self,
            endpoint: u8,
            len: usize,
            on_complete: CompletionFn,
        ) -> Result<()> {
            let mut inner = self.lock();
            if let Some(err) = inner.fail_submit.take() {
                return Err(err);
            }
            inner.submissions.push(len);
            inner.endpoints.push(endpoint);
            match inner.scripted.pop_front() {
                Some(mut completion) => {
                    completion.data.truncate(len);
                    inner.max_in_flight = inner.max_in_flight.max(inner.pending.len() + 1);
                    drop(inner);
                    self.shared.changed.notify_all();
                    on_complete(completion);
                }
                None => {
                    inner.pending.push_back((len, on_complete));
                    inner.max_in_flight = inner.max_in_flight.max(inner.pending.len());
                    drop(inner);
                    self.shared.changed.notify_all();
                }
            }
            Ok(())
        }

        fn cancel_in_flight(&self) {
            let pending: Vec<_> = {
                let mut inner = self.lock();
                inner.cancels += 1;
                inner.pending.drain(..).collect()
            };
            for (_, on_complete) in pending {
                on_complete(Completion::cancelled());
            }
        }

        fn acquire_activity(&self) -> Result<()> {
            let mut inner = self.lock();
            if let Some(err) = inner.fail_acquire.take() {
                return Err(err);
            }
            inner.tokens += 1;
            Ok(())
        }

        fn release_activity(&self) {
            let mut inner = self.lock();
            inner.tokens = inner.tokens.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<Completion>>>, impl Fn() -> CompletionFn) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let make = move || -> CompletionFn {
            let sink = sink.clone();
            Box::new(move |c| sink.lock().unwrap().push(c))
        };
        (seen, make)
    }

    #[test]
    fn error_codes() {
        assert_eq!(TransportError::Busy("x".into()).code(), EBUSY);
        assert_eq!(TransportError::Disconnected.code(), ENODEV);
        let e = TransportError::Failed {
            code: 71,
            detail: "proto".into(),
        };
        assert_eq!(e.code(), 71);
        assert_eq!(e.to_string(), "proto (code 71)");
    }

    #[test]
    fn mock_pending_until_completed() {
        let mock = MockTransport::new();
        let (seen, make) = recorder();
        mock.submit_bulk_in(0x83, 64, make()).unwrap();
        assert_eq!(mock.pending_len(), Some(64));
        assert!(seen.lock().unwrap().is_empty());

        assert!(mock.complete(Completion::ok(vec![1, 2, 3])));
        assert_eq!(seen.lock().unwrap()[0].data, vec![1, 2, 3]);
        assert_eq!(mock.pending_len(), None);
        assert!(!mock.complete(Completion::ok(vec![])));
    }

    #[test]
    fn mock_scripted_completion_is_inline() {
        let mock = MockTransport::new();
        mock.script(Completion::error(5));
        let (seen, make) = recorder();
        mock.submit_bulk_in(0x83, 8, make()).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(mock.pending_len(), None);
        assert_eq!(mock.submissions(), vec![8]);
        assert_eq!(mock.endpoints(), vec![0x83]);
    }

    #[test]
    fn mock_cancel_completes_pending_as_cancelled() {
        let mock = MockTransport::new();
        let (seen, make) = recorder();
        mock.submit_bulk_in(0x83, 8, make()).unwrap();
        mock.cancel_in_flight();
        assert_eq!(mock.cancel_count(), 1);
        assert_eq!(seen.lock().unwrap()[0], Completion::cancelled());
    }

    #[test]
    fn mock_failure_injection_is_one_shot() {
        let mock = MockTransport::new();
        mock.fail_next_acquire(TransportError::Busy("claimed".into()));
        assert!(mock.acquire_activity().is_err());
        assert!(mock.acquire_activity().is_ok());
        assert_eq!(mock.active_tokens(), 1);
        mock.release_activity();
        mock.release_activity();
        assert_eq!(mock.active_tokens(), 0);

        let (_seen, make) = recorder();
        mock.fail_next_submit(TransportError::Disconnected);
        assert_eq!(
            mock.submit_bulk_in(0x83, 8, make()),
            Err(TransportError::Disconnected)
        );
        assert!(mock.submissions().is_empty());
    }
}

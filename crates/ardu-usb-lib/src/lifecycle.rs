//! Open / close / disconnect protocol.
//!
//! - [`open`] looks a device up in the [`Registry`], takes an activity token
//!   and returns a [`Handle`] holding a strong reference.
//! - [`Handle::close`] (or dropping the handle) returns the token, then the
//!   reference. The last reference out destroys the device.
//! - [`disconnect`] is called by the attachment layer when the device goes
//!   away. It never waits for handles to close.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::device::{Device, DeviceError, DeviceInfo, ReadMode, Result, TransferSnapshot};
use crate::registry::{NodeId, Registry};

/// What disconnect does about a transfer that is still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectPolicy {
    /// Wake blocked readers with `NoDevice` and cancel the transfer.
    #[default]
    CancelAndWake,
    /// Leave the transfer alone; disconnect waits for an active read, which
    /// only returns once its transfer completes on its own.
    WaitForCompletion,
}

/// Open the device published under `node`.
///
/// Fails with `NotFound` if nothing is published there, or with the
/// transport's error if the activity token cannot be taken. Nothing is
/// retained on failure.
pub fn open(registry: &Registry, node: NodeId) -> Result<Handle> {
    let device = registry.lookup(node).ok_or(DeviceError::NotFound)?;
    device.transport().acquire_activity()?;
    log::debug!(
        "{}: opened ({} references)",
        registry.name(node),
        Arc::strong_count(&device)
    );
    Ok(Handle {
        device,
        interrupt: Arc::new(AtomicBool::new(false)),
        mode: ReadMode::Blocking,
        closed: false,
    })
}

/// Tear down the node for a device that went away.
///
/// Unpublishes `node` so it can no longer be opened, marks the device
/// disconnected and drops the registry's reference. If no handle is open the
/// device is destroyed here; otherwise by the last close.
pub fn disconnect(registry: &Registry, node: NodeId, policy: DisconnectPolicy) -> Result<()> {
    let device = registry.unpublish(node).ok_or(DeviceError::NotFound)?;
    device.mark_disconnected(policy);
    log::info!(
        "{}: disconnected, {} handle(s) still open",
        registry.name(node),
        Arc::strong_count(&device) - 1
    );
    Ok(())
}

/// An open device.
///
/// Reads are served through the shared [`Device`]; after disconnect every
/// read fails with `NoDevice` until the handle is closed.
pub struct Handle {
    device: Arc<Device>,
    interrupt: Arc<AtomicBool>,
    mode: ReadMode,
    closed: bool,
}

impl Handle {
    /// Read up to `out.len()` bytes, blocking or not according to `mode`.
    pub fn read(&self, out: &mut [u8], mode: ReadMode) -> Result<usize> {
        self.device.read(out, mode, &self.interrupt)
    }

    /// Mode used by the [`io::Read`] impl.
    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.mode = if nonblocking {
            ReadMode::NonBlocking
        } else {
            ReadMode::Blocking
        };
    }

    pub fn info(&self) -> &DeviceInfo {
        self.device.info()
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        self.device.snapshot()
    }

    /// A cloneable way to interrupt a read blocked on this handle from
    /// another thread.
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            device: Arc::downgrade(&self.device),
            flag: self.interrupt.clone(),
        }
    }

    /// Release the activity token, then the device reference.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.device.transport().release_activity();
        log::debug!(
            "{}: closed ({} references left)",
            self.device.info().path,
            Arc::strong_count(&self.device) - 1
        );
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.release();
    }
}

impl io::Read for Handle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Handle::read(self, buf, self.mode).map_err(io::Error::from)
    }
}

/// Interrupts a read blocked on the handle it came from.
///
/// The interruption is delivered once: the blocked read returns
/// `Interrupted` and consumes it. Raised while no read is blocked, it ends
/// the next wait instead.
#[derive(Clone)]
pub struct Interrupter {
    device: Weak<Device>,
    flag: Arc<AtomicBool>,
}

impl Interrupter {
    pub fn interrupt(&self) {
        match self.device.upgrade() {
            Some(device) => device.interrupt(&self.flag),
            None => self.flag.store(true, Ordering::Release),
        }
    }
}

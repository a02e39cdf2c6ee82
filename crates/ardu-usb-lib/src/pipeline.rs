//! Read pipeline: turns asynchronous bulk-in completions into blocking reads.
//!
//! One call to [`Device::read`] first takes the device's read slot, waiting
//! on `waiters` while another handle's read owns it, then holds the
//! long-lived lock from start to finish, so reads on one device are
//! serialized. Within it the loop is:
//!
//! 1. disconnected → `NoDevice`
//! 2. transfer outstanding → `WouldBlock` (non-blocking) or wait for it
//! 3. completion recorded an error → surface it once, clear it
//! 4. unconsumed bytes → copy out, prefetch the remainder if the caller
//!    wanted more than was left, return
//! 5. nothing buffered → submit a transfer and go round again

use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::device::{Device, DeviceError, ReadMode, Result, Shared};
use crate::protocol::status_name;

impl Device {
    /// Read up to `out.len()` bytes.
    ///
    /// `interrupt` is the calling handle's interrupt flag; it is consumed if
    /// it ends a wait.
    pub(crate) fn read(
        &self,
        out: &mut [u8],
        mode: ReadMode,
        interrupt: &AtomicBool,
    ) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        let _slot = self.claim_read_slot(mode, interrupt)?;
        let state = self.lock_state();
        loop {
            if state.disconnected {
                return Err(DeviceError::NoDevice);
            }

            let mut shared = self.lock_shared();
            if shared.detached {
                return Err(DeviceError::NoDevice);
            }
            if shared.pending.in_flight() {
                if mode == ReadMode::NonBlocking {
                    return Err(DeviceError::WouldBlock);
                }
                shared = self.wait_for_completion(shared, interrupt)?;
            }

            if let Some(code) = shared.last_error.take() {
                return Err(DeviceError::Io {
                    code,
                    detail: status_name(code).into(),
                });
            }

            let available = shared.buffer.available();
            if available == 0 {
                drop(shared);
                if interrupt.swap(false, Ordering::AcqRel) {
                    return Err(DeviceError::Interrupted);
                }
                self.submit(out.len())?;
                continue;
            }

            let copied = shared.buffer.consume_into(out);
            drop(shared);

            if available < out.len() {
                // The caller could take more: get the next chunk moving now.
                if let Err(e) = self.submit(out.len() - copied) {
                    log::warn!("{}: prefetch failed: {e}", self.info().path);
                }
            }
            return Ok(copied);
        }
    }

    /// Wait until no other read is active, then mark this one active.
    ///
    /// A read queued here can still be interrupted or woken by a cancelling
    /// disconnect, neither of which could reach it inside `lock_state`.
    fn claim_read_slot(&self, mode: ReadMode, interrupt: &AtomicBool) -> Result<ReadSlot<'_>> {
        let mut shared = self.lock_shared();
        while shared.reading {
            if shared.detached {
                return Err(DeviceError::NoDevice);
            }
            if mode == ReadMode::NonBlocking {
                return Err(DeviceError::WouldBlock);
            }
            if interrupt.swap(false, Ordering::AcqRel) {
                return Err(DeviceError::Interrupted);
            }
            shared = self
                .waiters
                .wait(shared)
                .unwrap_or_else(PoisonError::into_inner);
        }
        shared.reading = true;
        Ok(ReadSlot { device: self })
    }

    /// Sleep on `waiters` until the outstanding transfer completes.
    fn wait_for_completion<'a>(
        &self,
        mut shared: MutexGuard<'a, Shared>,
        interrupt: &AtomicBool,
    ) -> Result<MutexGuard<'a, Shared>> {
        loop {
            if shared.detached {
                return Err(DeviceError::NoDevice);
            }
            if !shared.pending.in_flight() {
                return Ok(shared);
            }
            if interrupt.swap(false, Ordering::AcqRel) {
                return Err(DeviceError::Interrupted);
            }
            shared = self
                .waiters
                .wait(shared)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// The active-read slot; released and announced to queued readers on drop.
struct ReadSlot<'a> {
    device: &'a Device,
}

impl Drop for ReadSlot<'_> {
    fn drop(&mut self) {
        let mut shared = self.device.lock_shared();
        shared.reading = false;
        self.device.waiters.notify_all();
    }
}

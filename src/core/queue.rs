//! Submission queue serial bookkeeping.
//!
//! Tracks the last submitted and last completed serial on top of the
//! backend fence, and latches device loss so nothing waits on a dead fence.

use log::{debug, warn};

use super::serial::ExecutionSerial;
use crate::gpu::traits::{GpuAllocError, GpuBackend};

/// Owns the backend and the serial counters of its single submission queue.
pub struct Queue {
    backend: Box<dyn GpuBackend>,
    last_submitted: ExecutionSerial,
    completed: ExecutionSerial,
    lost: bool,
}

impl Queue {
    /// Wrap a backend. No serial has been submitted yet.
    pub fn new(backend: Box<dyn GpuBackend>) -> Self {
        Self {
            backend,
            last_submitted: ExecutionSerial::ZERO,
            completed: ExecutionSerial::ZERO,
            lost: false,
        }
    }

    /// Access the backend.
    pub fn backend(&self) -> &dyn GpuBackend {
        self.backend.as_ref()
    }

    /// Mutable access to the backend.
    pub fn backend_mut(&mut self) -> &mut dyn GpuBackend {
        self.backend.as_mut()
    }

    /// Serial that work recorded now will be signaled with.
    pub fn pending_serial(&self) -> ExecutionSerial {
        self.last_submitted.next()
    }

    /// Last serial signaled on the fence.
    pub fn last_submitted_serial(&self) -> ExecutionSerial {
        self.last_submitted
    }

    /// Last serial known to be complete. Only refreshed by
    /// [`check_passed_serials`](Self::check_passed_serials) and waits.
    pub fn completed_serial(&self) -> ExecutionSerial {
        self.completed
    }

    /// Whether the device has been lost.
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Latch device loss. Serial queries are meaningless afterwards.
    pub fn set_lost(&mut self) {
        if !self.lost {
            warn!(
                "device lost (last submitted {}, completed {})",
                self.last_submitted, self.completed
            );
        }
        self.lost = true;
    }

    /// Signal the pending serial and advance.
    pub fn next_serial(&mut self) -> Result<ExecutionSerial, GpuAllocError> {
        if self.lost {
            return Err(GpuAllocError::DeviceLost);
        }
        let serial = self.pending_serial();
        self.observe(|backend| backend.signal(serial))?;
        self.last_submitted = serial;
        Ok(serial)
    }

    /// Refresh the completed serial from the fence.
    ///
    /// The completed serial never moves backwards and never passes the last
    /// submitted serial.
    pub fn check_passed_serials(&mut self) -> Result<ExecutionSerial, GpuAllocError> {
        if self.lost {
            return Err(GpuAllocError::DeviceLost);
        }
        let value = self.observe(|backend| backend.completed_value())?;
        let value = value.min(self.last_submitted);
        if value > self.completed {
            self.completed = value;
        }
        Ok(self.completed)
    }

    /// Block until `serial` has completed.
    ///
    /// Returns `DeviceLost` without touching the fence once the device is lost.
    pub fn wait_for_serial(&mut self, serial: ExecutionSerial) -> Result<(), GpuAllocError> {
        if self.lost {
            return Err(GpuAllocError::DeviceLost);
        }
        self.check_passed_serials()?;
        if self.completed >= serial {
            return Ok(());
        }
        debug!("waiting for serial {} (completed {})", serial, self.completed);
        self.observe(|backend| backend.wait_for(serial))?;
        self.check_passed_serials()?;
        Ok(())
    }

    /// Block until everything submitted so far has completed.
    pub fn wait_for_idle(&mut self) -> Result<(), GpuAllocError> {
        self.wait_for_serial(self.last_submitted)
    }

    /// Run a backend call, latching device loss if it reports one.
    fn observe<T>(
        &mut self,
        call: impl FnOnce(&mut dyn GpuBackend) -> Result<T, GpuAllocError>,
    ) -> Result<T, GpuAllocError> {
        let result = call(self.backend.as_mut());
        if let Err(GpuAllocError::DeviceLost) = result {
            self.set_lost();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::DummyBackend;

    #[test]
    fn test_serials_advance() {
        let gpu = DummyBackend::new();
        let mut queue = Queue::new(Box::new(gpu.clone()));

        assert_eq!(queue.pending_serial(), ExecutionSerial::new(1));
        assert_eq!(queue.next_serial().unwrap(), ExecutionSerial::new(1));
        assert_eq!(queue.pending_serial(), ExecutionSerial::new(2));
        assert_eq!(gpu.signaled_serial(), ExecutionSerial::new(1));

        assert_eq!(queue.check_passed_serials().unwrap(), ExecutionSerial::ZERO);
        gpu.complete_all();
        assert_eq!(queue.check_passed_serials().unwrap(), ExecutionSerial::new(1));
    }

    #[test]
    fn test_wait_skips_completed_serials() {
        let gpu = DummyBackend::new();
        let mut queue = Queue::new(Box::new(gpu.clone()));
        queue.next_serial().unwrap();
        queue.next_serial().unwrap();

        gpu.complete_up_to(ExecutionSerial::new(1));
        queue.wait_for_serial(ExecutionSerial::new(1)).unwrap();
        assert!(gpu.waits().is_empty());

        queue.wait_for_idle().unwrap();
        assert_eq!(gpu.waits(), vec![ExecutionSerial::new(2)]);
        assert_eq!(queue.completed_serial(), ExecutionSerial::new(2));
    }

    #[test]
    fn test_loss_is_latched() {
        let gpu = DummyBackend::new();
        let mut queue = Queue::new(Box::new(gpu.clone()));
        queue.next_serial().unwrap();

        gpu.lose();
        assert_eq!(queue.check_passed_serials(), Err(GpuAllocError::DeviceLost));
        assert!(queue.is_lost());

        assert_eq!(
            queue.wait_for_serial(ExecutionSerial::new(1)),
            Err(GpuAllocError::DeviceLost)
        );
        assert!(gpu.waits().is_empty());
    }
}

//! Millisecond delays used for sensor settle times.

use std::time::Duration;

pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

impl<T: Delay + ?Sized> Delay for &mut T {
    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms);
    }
}

/// Blocks the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay_ms(&mut self, ms: u32) {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(u64::from(ms)));
        }
    }
}

/// Returns immediately and keeps a tally of the requested time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedDelay {
    pub total_ms: u64,
    pub calls: u32,
}

impl Delay for SimulatedDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.total_ms += u64::from(ms);
        self.calls += 1;
    }
}

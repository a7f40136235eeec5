//! Software stand-in for the DMA engine.
//!
//! [`SimulatedHardware`] plays the interrupt role either on demand
//! ([`SimClock::Manual`], driven through a [`SimHandle`]) or from a ticker
//! thread running at the stream's period rate ([`SimClock::Clocked`]).

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;

use crate::buffer::DmaRegion;
use crate::error::{AllocationError, HardwareError};
use crate::format::Direction;
use crate::hardware::{HardwareLayer, PeriodProducer};

/// How simulated periods are paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimClock {
    /// Periods complete only when a [`SimHandle`] says so.
    Manual,
    /// Periods complete every `period_frames / sample_rate` seconds.
    Clocked { sample_rate: u32, period_frames: usize },
}

impl SimClock {
    pub fn period(&self) -> Option<Duration> {
        match *self {
            SimClock::Manual => None,
            SimClock::Clocked {
                sample_rate,
                period_frames,
            } if sample_rate > 0 => Some(Duration::from_nanos(
                period_frames as u64 * 1_000_000_000 / u64::from(sample_rate),
            )),
            SimClock::Clocked { .. } => None,
        }
    }
}

#[derive(Default)]
struct Shared {
    producer: ArcSwapOption<PeriodProducer>,
    // Interrupts never nest; completions from the handle and the ticker are
    // serialized through this lock.
    irq: Mutex<()>,
}

struct Ticker {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

pub struct SimulatedHardware {
    clock: SimClock,
    shared: Arc<Shared>,
    ticker: Option<Ticker>,
    region_limit: Option<usize>,
}

impl SimulatedHardware {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            shared: Arc::new(Shared::default()),
            ticker: None,
            region_limit: None,
        }
    }

    /// Refuses period buffers larger than `bytes`, like a board with a small
    /// DMA pool.
    pub fn with_region_limit(mut self, bytes: usize) -> Self {
        self.region_limit = Some(bytes);
        self
    }

    pub fn clock(&self) -> SimClock {
        self.clock
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn spawn_ticker(&mut self, period: Duration) -> Result<(), HardwareError> {
        let (stop, stopped) = bounded::<()>(1);
        let handle = self.handle();
        let thread = thread::Builder::new()
            .name("rtpcm-sim-clock".into())
            .spawn(move || {
                let ticks = tick(period);
                loop {
                    select! {
                        recv(ticks) -> _ => {
                            handle.complete_period();
                        }
                        recv(stopped) -> _ => break,
                    }
                }
            })
            .map_err(|err| HardwareError::Unavailable(format!("sim clock thread: {err}")))?;

        tracing::debug!(?period, "simulated clock started");
        self.ticker = Some(Ticker { stop, thread });
        Ok(())
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.stop.send(());
            if ticker.thread.join().is_err() {
                tracing::error!("simulated clock thread panicked");
            }
        }
    }
}

impl HardwareLayer for SimulatedHardware {
    fn name(&self) -> &str {
        match self.clock {
            SimClock::Manual => "simulated (manual)",
            SimClock::Clocked { .. } => "simulated (clocked)",
        }
    }

    fn allocate_region(&mut self, bytes: usize) -> Result<DmaRegion, AllocationError> {
        if let Some(limit) = self.region_limit {
            if bytes > limit {
                tracing::warn!(bytes, limit, "simulated DMA pool exhausted");
                return Err(AllocationError::OutOfMemory { bytes });
            }
        }
        DmaRegion::allocate(bytes)
    }

    fn register(&mut self, producer: Arc<PeriodProducer>) -> Result<(), HardwareError> {
        if self.shared.producer.load().is_some() {
            return Err(HardwareError::AlreadyRegistered);
        }
        self.shared.producer.store(Some(producer));

        if let Some(period) = self.clock.period() {
            if let Err(err) = self.spawn_ticker(period) {
                self.shared.producer.store(None);
                return Err(err);
            }
        }
        Ok(())
    }

    fn deregister(&mut self) -> bool {
        self.stop_ticker();
        // Wait out an in-flight completion so none lands after we return.
        let _irq = self.shared.irq.lock();
        self.shared.producer.swap(None).is_some()
    }
}

impl Drop for SimulatedHardware {
    fn drop(&mut self) {
        self.deregister();
    }
}

impl std::fmt::Debug for SimulatedHardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedHardware")
            .field("clock", &self.clock)
            .field("registered", &self.shared.producer.load().is_some())
            .finish()
    }
}

/// Drives a [`SimulatedHardware`] from tests and tools.
#[derive(Clone)]
pub struct SimHandle {
    shared: Arc<Shared>,
}

impl SimHandle {
    /// Fills the input block of the half being "recorded" with a ramp and
    /// completes the period. Returns `false` when no producer is registered.
    pub fn complete_period(&self) -> bool {
        let _irq = self.shared.irq.lock();
        let Some(producer) = self.shared.producer.load_full() else {
            return false;
        };

        let period = producer.completions() as u32;
        let input = producer.dma_block(Direction::Input);
        let words = input.len() as u32;
        for i in 0..input.len() {
            input.store(i, period.wrapping_mul(words).wrapping_add(i as u32));
        }

        producer.period_complete();
        true
    }

    /// Completes `count` periods back to back; returns how many landed.
    pub fn complete_periods(&self, count: usize) -> usize {
        (0..count).take_while(|_| self.complete_period()).count()
    }

    pub fn is_registered(&self) -> bool {
        self.shared.producer.load().is_some()
    }
}

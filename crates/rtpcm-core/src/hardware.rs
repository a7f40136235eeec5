//! Seam between the session and whatever drives the DMA engine.

use std::sync::Arc;

use crate::buffer::{BufferLayout, DmaRegion, Half, PeriodBuffer, SampleBlock};
use crate::error::{AllocationError, HardwareError};
use crate::format::Direction;
use crate::signal::CompletionSignal;
use crate::tracker::UnderrunTracker;

/// Hardware collaborator of a [`Device`](crate::session::Device).
///
/// Implementations supply DMA-capable memory and, while a producer is
/// registered, call [`PeriodProducer::period_complete`] exactly once per
/// completed hardware period from their interrupt path.
pub trait HardwareLayer: Send {
    fn name(&self) -> &str;

    /// Memory backing the period buffer. Called once per session, before it
    /// starts.
    fn allocate_region(&mut self, bytes: usize) -> Result<DmaRegion, AllocationError> {
        DmaRegion::allocate(bytes)
    }

    /// Starts delivering period completions to `producer`.
    ///
    /// The session builds its producer once and hands out clones of the same
    /// `Arc` on every start, so registering never allocates.
    fn register(&mut self, producer: Arc<PeriodProducer>) -> Result<(), HardwareError>;

    /// Stops delivering completions. Returns whether a producer was
    /// registered.
    fn deregister(&mut self) -> bool;
}

/// Interrupt-side handle of a session.
///
/// Cloning happens on the control path; [`period_complete`] itself touches
/// three atomics and nothing else.
///
/// [`period_complete`]: PeriodProducer::period_complete
#[derive(Clone)]
pub struct PeriodProducer {
    buffer: Arc<PeriodBuffer>,
    tracker: Arc<UnderrunTracker>,
    signal: CompletionSignal,
}

impl PeriodProducer {
    pub(crate) fn new(
        buffer: Arc<PeriodBuffer>,
        tracker: Arc<UnderrunTracker>,
        signal: CompletionSignal,
    ) -> Self {
        Self {
            buffer,
            tracker,
            signal,
        }
    }

    /// One hardware period has completed: count it, hand the finished half
    /// to the consumer and wake it.
    #[inline]
    pub fn period_complete(&self) {
        self.tracker.on_period_complete();
        self.buffer.flip();
        self.signal.raise();
    }

    #[inline]
    pub fn layout(&self) -> &BufferLayout {
        self.buffer.layout()
    }

    /// Half the hardware is filling until the next completion.
    #[inline]
    pub fn dma_half(&self) -> Half {
        self.buffer.dma_half()
    }

    #[inline]
    pub fn completions(&self) -> u64 {
        self.tracker.completions()
    }

    /// Block of `direction` in the half currently owned by the hardware.
    #[inline]
    pub fn dma_block(&self, direction: Direction) -> SampleBlock<'_> {
        self.buffer.block(self.buffer.dma_half(), direction)
    }
}

impl std::fmt::Debug for PeriodProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodProducer")
            .field("dma_half", &self.dma_half())
            .field("completions", &self.completions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;
    use crate::signal::WaitResult;

    #[test]
    fn period_complete_counts_flips_and_raises() {
        let layout = BufferLayout::new(32, 2, 2, SampleFormat::Int32).unwrap();
        let buffer = Arc::new(PeriodBuffer::allocate(layout).unwrap());
        let tracker = Arc::new(UnderrunTracker::new());
        let (signal, mut waiter) = CompletionSignal::new();
        let producer = PeriodProducer::new(Arc::clone(&buffer), Arc::clone(&tracker), signal);

        assert_eq!(producer.dma_half(), Half::A);
        producer.period_complete();
        assert_eq!(tracker.completions(), 1);
        assert_eq!(buffer.active_half(), Half::A);
        assert_eq!(producer.dma_half(), Half::B);
        assert_eq!(waiter.try_wait(), Some(WaitResult::Ready));
    }
}

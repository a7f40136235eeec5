//! rtpcm core
//! ==========
//! Period-synchronous audio plumbing between a DMA engine and a real-time
//! user thread. The hardware completes one period at a time into one half of
//! a ping-pong buffer; an interrupt-time producer flips the buffer, bumps a
//! completion counter and raises a completion signal; a single consumer thread
//! wakes, processes the ready half in place and acknowledges, which is where
//! missed deadlines are counted.
//!
//! The crate is organised leaves first:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`error`] | Error taxonomy of control and consumer operations |
//! | [`format`] | Sample formats and stream directions |
//! | [`config`] | Session parameters and hardware profiles |
//! | [`channels`] | Immutable per-direction channel descriptor tables |
//! | [`buffer`] | DMA-backed shared ping-pong period buffer |
//! | [`signal`] | Single-waiter completion signal with a destroyed state |
//! | [`tracker`] | Completion / acknowledgment counters and under-runs |
//! | [`hardware`] | Collaborator trait and the producer callback handle |
//! | [`session`] | Device exclusivity and the session state machine |
//! | [`sim`] | Simulated hardware used by the CLI and the tests |
//! | [`rt`] | Scheduling and memory locking for the consumer thread |

pub mod buffer;
pub mod channels;
pub mod config;
pub mod error;
pub mod format;
pub mod hardware;
pub mod rt;
pub mod session;
pub mod signal;
pub mod sim;
pub mod tracker;

pub use buffer::{BufferLayout, BufferMapping, DmaRegion, Half, PeriodBuffer, SampleBlock};
pub use channels::{ChannelDescriptor, ChannelTable, CHANNEL_NAME_SIZE, DESCRIPTOR_WIRE_SIZE};
pub use config::{
    ConfigError, HardwareProfile, PlatformType, SessionConfig, UsbAudioType, SUPPORTED_PERIOD_SIZES,
};
pub use error::{AllocationError, HardwareError, SessionError};
pub use format::{Direction, SampleFormat};
pub use hardware::{HardwareLayer, PeriodProducer};
pub use session::{Consumer, Device, DeviceInfo, ReadyPeriod, Session, SessionState};
pub use signal::{CompletionSignal, SignalWaiter, WaitResult};
pub use sim::{SimClock, SimHandle, SimulatedHardware};
pub use tracker::{Diagnostics, UnderrunTracker};

/// Driver interface version reported through [`DeviceInfo`].
pub const VERSION: (u32, u32, u32) = (1, 1, 1);

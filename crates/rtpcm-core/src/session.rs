//! Device exclusivity and the session lifecycle.
//!
//! ```text
//! Closed ──open──► Open ──start──► Running ◄──start── Idle
//!                    │                │  └────stop────►│
//!                    └─────close──────┴──────close─────┴──► Closed
//! ```
//!
//! A [`Device`] wraps one hardware instance and admits at most one
//! [`Session`] at a time. The session owns the control side; the single
//! [`Consumer`] it hands out owns the waiting side and is meant to live on
//! the real-time thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::buffer::{BufferLayout, BufferMapping, Half, PeriodBuffer, SampleBlock};
use crate::channels::ChannelTable;
use crate::config::{HardwareProfile, PlatformType, SessionConfig, UsbAudioType};
use crate::error::SessionError;
use crate::format::Direction;
use crate::hardware::{HardwareLayer, PeriodProducer};
use crate::signal::{CompletionSignal, SignalWaiter, WaitResult};
use crate::tracker::{Diagnostics, UnderrunTracker};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Open,
    Running,
    Idle,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Open => "open",
            SessionState::Running => "running",
            SessionState::Idle => "idle",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Static description of a device, plus the period size of the active
/// session if there is one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub version: String,
    pub hardware: String,
    pub profile: &'static str,
    pub sample_rate: u32,
    pub input_channels: usize,
    pub output_channels: usize,
    pub period_frames: Option<usize>,
    pub platform_type: PlatformType,
    pub usb_audio_type: UsbAudioType,
    pub low_latency: bool,
    pub session_active: bool,
}

struct DeviceInner {
    profile: HardwareProfile,
    hardware: Mutex<Box<dyn HardwareLayer>>,
    active: AtomicBool,
    period_frames: AtomicUsize,
}

/// One audio hardware instance.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub fn new(profile: HardwareProfile, hardware: Box<dyn HardwareLayer>) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                profile,
                hardware: Mutex::new(hardware),
                active: AtomicBool::new(false),
                period_frames: AtomicUsize::new(0),
            }),
        }
    }

    pub fn profile(&self) -> &HardwareProfile {
        &self.inner.profile
    }

    pub fn is_session_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn info(&self) -> DeviceInfo {
        let (major, minor, rev) = crate::VERSION;
        let period_frames = match self.inner.period_frames.load(Ordering::Acquire) {
            0 => None,
            frames => Some(frames),
        };
        DeviceInfo {
            version: format!("{major}.{minor}.{rev}"),
            hardware: self.inner.hardware.lock().name().to_string(),
            profile: self.inner.profile.name,
            sample_rate: self.inner.profile.sample_rate,
            input_channels: self.inner.profile.input_channels,
            output_channels: self.inner.profile.output_channels,
            period_frames,
            platform_type: self.inner.profile.platform_type,
            usb_audio_type: self.inner.profile.usb_audio_type,
            low_latency: self.inner.profile.low_latency,
            session_active: self.is_session_active(),
        }
    }

    /// Opens the device's only session.
    ///
    /// Either everything (buffer, tables, signal, tracker) is set up or
    /// nothing is: partial allocations are released before the error is
    /// returned and the device stays free.
    pub fn open_session(&self, config: &SessionConfig) -> Result<Session, SessionError> {
        if let Err(err) = config.validate() {
            tracing::warn!(%err, "rejected session configuration");
            return Err(err.into());
        }

        let claim = DeviceClaim::acquire(&self.inner).ok_or_else(|| {
            tracing::warn!(profile = self.inner.profile.name, "session already active");
            SessionError::ExclusivityViolation {
                device: self.inner.profile.name.to_string(),
            }
        })?;

        let layout = config.layout()?;
        let region = self
            .inner
            .hardware
            .lock()
            .allocate_region(layout.total_bytes())?;
        let buffer = Arc::new(PeriodBuffer::with_region(layout, region)?);

        let inputs = ChannelTable::build(
            Direction::Input,
            config.input_channels,
            config.sample_format,
            config.input_channels,
        )?;
        let outputs = ChannelTable::build(
            Direction::Output,
            config.output_channels,
            config.sample_format,
            config.output_channels,
        )?;

        let tracker = Arc::new(UnderrunTracker::new());
        let (signal, waiter) = CompletionSignal::new();
        let producer = Arc::new(PeriodProducer::new(
            Arc::clone(&buffer),
            Arc::clone(&tracker),
            signal.clone(),
        ));

        self.inner
            .period_frames
            .store(config.frames_per_period, Ordering::Release);
        tracing::info!(
            profile = self.inner.profile.name,
            inputs = config.input_channels,
            outputs = config.output_channels,
            frames = config.frames_per_period,
            format = %config.sample_format,
            "session opened"
        );

        Ok(Session {
            claim,
            config: config.clone(),
            buffer,
            tracker,
            signal,
            producer,
            waiter: Mutex::new(Some(waiter)),
            inputs,
            outputs,
            state: Mutex::new(SessionState::Open),
        })
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("profile", &self.inner.profile.name)
            .field("session_active", &self.is_session_active())
            .finish()
    }
}

/// Marks the device busy for as long as it lives.
struct DeviceClaim {
    device: Arc<DeviceInner>,
}

impl DeviceClaim {
    fn acquire(device: &Arc<DeviceInner>) -> Option<Self> {
        device
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                device: Arc::clone(device),
            })
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        self.device.period_frames.store(0, Ordering::Release);
        self.device.active.store(false, Ordering::Release);
    }
}

/// An open audio stream.
pub struct Session {
    claim: DeviceClaim,
    config: SessionConfig,
    buffer: Arc<PeriodBuffer>,
    tracker: Arc<UnderrunTracker>,
    signal: CompletionSignal,
    producer: Arc<PeriodProducer>,
    waiter: Mutex<Option<SignalWaiter>>,
    inputs: ChannelTable,
    outputs: ChannelTable,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn layout(&self) -> &BufferLayout {
        self.buffer.layout()
    }

    /// Registers the producer with the hardware: Open/Idle to Running.
    pub fn start(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        match *state {
            SessionState::Open | SessionState::Idle => {}
            other => {
                tracing::warn!(state = %other, "start rejected");
                return Err(SessionError::invalid(format!("cannot start a {other} session")));
            }
        }

        self.claim
            .device
            .hardware
            .lock()
            .register(Arc::clone(&self.producer))?;
        *state = SessionState::Running;
        tracing::info!("session started");
        Ok(())
    }

    /// Deregisters the producer: Running to Idle.
    ///
    /// If the consumer is parked in a wait, the output blocks are cleared so
    /// the next start does not replay stale audio.
    pub fn stop(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if *state != SessionState::Running {
            let current = *state;
            tracing::warn!(state = %current, "stop rejected");
            return Err(SessionError::invalid(format!(
                "cannot stop a {current} session"
            )));
        }

        self.claim.device.hardware.lock().deregister();
        self.clear_if_parked();
        *state = SessionState::Idle;
        tracing::info!(diagnostics = ?self.diagnostics(), "session stopped");
        Ok(())
    }

    /// Hands out the consumer handle. There is exactly one per session.
    pub fn consumer(&self) -> Result<Consumer, SessionError> {
        let waiter = self
            .waiter
            .lock()
            .take()
            .ok_or_else(|| SessionError::invalid("consumer already taken"))?;

        Ok(Consumer {
            waiter,
            buffer: Arc::clone(&self.buffer),
            tracker: Arc::clone(&self.tracker),
            current: None,
        })
    }

    /// Read-only copy of the descriptor table for `direction`.
    pub fn channel_info(&self, direction: Direction) -> ChannelTable {
        match direction {
            Direction::Input => self.inputs.clone(),
            Direction::Output => self.outputs.clone(),
        }
    }

    /// Same as [`channel_info`](Self::channel_info) for a raw direction tag.
    pub fn channel_info_by_tag(&self, tag: u8) -> Result<ChannelTable, SessionError> {
        let direction = Direction::try_from(tag).map_err(|err| {
            tracing::warn!(tag, "channel info requested for unknown direction");
            err
        })?;
        Ok(self.channel_info(direction))
    }

    /// Copies the encoded table for `direction` into caller memory.
    pub fn copy_channel_info(
        &self,
        direction: Direction,
        dst: &mut [u8],
    ) -> Result<usize, SessionError> {
        let table = match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        };
        table.encode_into(dst).map_err(|err| {
            tracing::warn!(%direction, %err, "failed to copy channel info");
            err
        })
    }

    /// Zero-copy mapping of the period buffer.
    pub fn map_buffer(&self) -> BufferMapping {
        BufferMapping::new(Arc::clone(&self.buffer))
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.tracker.snapshot()
    }

    /// Tears the session down and frees the device.
    ///
    /// A consumer blocked in a wait returns [`SessionError::SignalDestroyed`].
    /// Mappings and the consumer may outlive the session; they keep the
    /// buffer memory alive but will never see another period.
    pub fn close(mut self) -> Diagnostics {
        self.teardown()
    }

    /// Whether the consumer is blocked in a wait with nothing pending.
    pub fn consumer_parked(&self) -> bool {
        self.signal.is_waiter_parked()
    }

    // Only called with the producer deregistered: a parked consumer then has
    // no raise to wake it and cannot be touching the buffer.
    fn clear_if_parked(&self) {
        if self.signal.is_waiter_parked() {
            self.buffer.clear_output();
            tracing::debug!("cleared output behind a parked consumer");
        }
    }

    fn teardown(&mut self) -> Diagnostics {
        let mut state = self.state.lock();
        let diagnostics = self.tracker.snapshot();
        if *state == SessionState::Closed {
            return diagnostics;
        }

        if *state == SessionState::Running {
            self.claim.device.hardware.lock().deregister();
        }
        self.clear_if_parked();
        self.signal.destroy();
        *state = SessionState::Closed;

        tracing::info!(
            completions = diagnostics.completions,
            under_runs = diagnostics.under_runs,
            "session closed"
        );
        diagnostics
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("diagnostics", &self.diagnostics())
            .finish()
    }
}

/// The real-time thread's handle on a session.
///
/// `wait_for_completion` takes `&mut self`, so two overlapping waits cannot
/// be expressed.
pub struct Consumer {
    waiter: SignalWaiter,
    buffer: Arc<PeriodBuffer>,
    tracker: Arc<UnderrunTracker>,
    current: Option<Half>,
}

impl Consumer {
    /// Blocks until the next period completes and returns the half that now
    /// belongs to the consumer.
    pub fn wait_for_completion(&mut self) -> Result<Half, SessionError> {
        let result = self.waiter.wait();
        self.accept(result)
    }

    /// Bounded variant of [`wait_for_completion`](Self::wait_for_completion);
    /// `Ok(None)` means the timeout elapsed with no period completed.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<Half>, SessionError> {
        let result = self.waiter.wait_timeout(timeout);
        result.map(|result| self.accept(result)).transpose()
    }

    fn accept(&mut self, result: WaitResult) -> Result<Half, SessionError> {
        match result {
            WaitResult::Ready => {
                let half = self.tracker.on_wait_ready(&self.buffer);
                self.current = Some(half);
                Ok(half)
            }
            WaitResult::Destroyed => {
                self.current = None;
                Err(SessionError::SignalDestroyed)
            }
        }
    }

    /// Acknowledges the current period; any periods that completed since the
    /// last wait are counted as under-runs.
    pub fn user_finished(&mut self) {
        self.current = None;
        self.tracker.on_user_finished();
    }

    /// View over the half returned by the last successful wait, until
    /// [`user_finished`](Self::user_finished) is called.
    pub fn ready_period(&self) -> Option<ReadyPeriod<'_>> {
        let half = self.current?;
        Some(ReadyPeriod {
            buffer: &self.buffer,
            half,
        })
    }

    /// Waits, runs `process` over the ready half, then acknowledges.
    pub fn run_cycle<F>(&mut self, process: F) -> Result<Half, SessionError>
    where
        F: FnOnce(&ReadyPeriod<'_>),
    {
        let half = self.wait_for_completion()?;
        let period = ReadyPeriod {
            buffer: &self.buffer,
            half,
        };
        process(&period);
        self.user_finished();
        Ok(half)
    }

    pub fn layout(&self) -> &BufferLayout {
        self.buffer.layout()
    }

    pub fn map_buffer(&self) -> BufferMapping {
        BufferMapping::new(Arc::clone(&self.buffer))
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.tracker.snapshot()
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("current", &self.current)
            .field("diagnostics", &self.diagnostics())
            .finish()
    }
}

/// The half a consumer owns between a wait and its acknowledgment.
pub struct ReadyPeriod<'a> {
    buffer: &'a PeriodBuffer,
    half: Half,
}

impl<'a> ReadyPeriod<'a> {
    #[inline]
    pub fn half(&self) -> Half {
        self.half
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.buffer.layout().frames()
    }

    /// Captured samples, interleaved.
    #[inline]
    pub fn input(&self) -> SampleBlock<'a> {
        self.buffer.block(self.half, Direction::Input)
    }

    /// Samples to play, interleaved.
    #[inline]
    pub fn output(&self) -> SampleBlock<'a> {
        self.buffer.block(self.half, Direction::Output)
    }

    /// Both blocks at once.
    #[inline]
    pub fn split(&self) -> (SampleBlock<'a>, SampleBlock<'a>) {
        (self.input(), self.output())
    }
}

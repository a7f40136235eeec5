//! Shared ping-pong period buffer.
//!
//! ```text
//!            half A                          half B
//! ┌──────────────┬───────────────┬──────────────┬───────────────┐
//! │ input block  │ output block  │ input block  │ output block  │
//! │ frames × in  │ frames × out  │ frames × in  │ frames × out  │
//! └──────────────┴───────────────┴──────────────┴───────────────┘
//! ```
//!
//! Ownership protocol: at any instant the hardware owns the half reported by
//! [`PeriodBuffer::dma_half`] and the consumer owns the other one, reported by
//! [`PeriodBuffer::active_half`]. Ownership only changes through
//! [`PeriodBuffer::flip`], which the producer calls once per completed period.
//! A consumer that overruns its deadline keeps touching a half the hardware
//! has already reclaimed. Samples are only ever reached through
//! [`SampleBlock`], whose words are atomics, so such an overrun yields mixed
//! periods (counted as under-runs) and never undefined behaviour.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{AllocationError, SessionError};
use crate::format::{Direction, SampleFormat};

/// Alignment (and size granularity) of DMA regions.
pub const DMA_ALIGNMENT: usize = 4096;

/// One of the two halves of the ping-pong buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Half {
    A = 0,
    B = 1,
}

impl Half {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn other(self) -> Half {
        match self {
            Half::A => Half::B,
            Half::B => Half::A,
        }
    }

    #[inline]
    fn from_bit(bit: u8) -> Half {
        if bit & 1 == 0 {
            Half::A
        } else {
            Half::B
        }
    }
}

/// Page-aligned, zero-initialised memory suitable for a DMA engine.
///
/// The region is locked in RAM when the OS allows it; a refused lock only
/// costs page-fault protection and is not an error.
pub struct DmaRegion {
    ptr: NonNull<u8>,
    layout: Layout,
    locked: bool,
}

// Safety: the region is plain memory owned by this value; concurrent access is
// governed by the aliasing contract of `PeriodBuffer`.
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

impl DmaRegion {
    pub fn allocate(bytes: usize) -> Result<Self, AllocationError> {
        if bytes == 0 {
            return Err(AllocationError::Empty);
        }
        let size = bytes
            .checked_add(DMA_ALIGNMENT - 1)
            .map(|padded| padded / DMA_ALIGNMENT * DMA_ALIGNMENT)
            .ok_or(AllocationError::Overflow { bytes })?;
        let layout = Layout::from_size_align(size, DMA_ALIGNMENT)
            .map_err(|_| AllocationError::Overflow { bytes })?;

        // Safety: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(AllocationError::OutOfMemory { bytes: size })?;
        let locked = lock_pages(ptr, size);

        tracing::debug!(bytes = size, locked, "allocated dma region");
        Ok(Self {
            ptr,
            layout,
            locked,
        })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Size of the mapping, a multiple of [`DMA_ALIGNMENT`].
    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        if self.locked {
            unlock_pages(self.ptr, self.layout.size());
        }
        // Safety: allocated in `allocate` with the same layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for DmaRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaRegion")
            .field("len", &self.layout.size())
            .field("locked", &self.locked)
            .finish()
    }
}

#[cfg(target_os = "linux")]
fn lock_pages(ptr: NonNull<u8>, len: usize) -> bool {
    // Safety: the range is a live allocation owned by the caller.
    let result = unsafe { libc::mlock(ptr.as_ptr() as *const libc::c_void, len) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        tracing::warn!(?err, bytes = len, "could not lock dma region in memory");
        return false;
    }
    true
}

#[cfg(not(target_os = "linux"))]
fn lock_pages(_ptr: NonNull<u8>, _len: usize) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn unlock_pages(ptr: NonNull<u8>, len: usize) {
    // Safety: same range that was passed to mlock.
    unsafe {
        libc::munlock(ptr.as_ptr() as *const libc::c_void, len);
    }
}

#[cfg(not(target_os = "linux"))]
fn unlock_pages(_ptr: NonNull<u8>, _len: usize) {}

/// Geometry of a period buffer, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferLayout {
    frames: usize,
    input_channels: usize,
    output_channels: usize,
    sample_format: SampleFormat,
    input_words: usize,
    output_words: usize,
    total_bytes: usize,
}

impl BufferLayout {
    pub fn new(
        frames: usize,
        input_channels: usize,
        output_channels: usize,
        sample_format: SampleFormat,
    ) -> Result<Self, AllocationError> {
        let overflow = AllocationError::Overflow { bytes: usize::MAX };
        let input_words = frames.checked_mul(input_channels).ok_or(overflow.clone())?;
        let output_words = frames.checked_mul(output_channels).ok_or(overflow.clone())?;
        let total_bytes = input_words
            .checked_add(output_words)
            .and_then(|words| words.checked_mul(2))
            .and_then(|words| words.checked_mul(sample_format.bytes_per_sample()))
            .ok_or(overflow)?;
        if total_bytes == 0 {
            return Err(AllocationError::Empty);
        }

        Ok(Self {
            frames,
            input_channels,
            output_channels,
            sample_format,
            input_words,
            output_words,
            total_bytes,
        })
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn channels(&self, direction: Direction) -> usize {
        match direction {
            Direction::Input => self.input_channels,
            Direction::Output => self.output_channels,
        }
    }

    #[inline]
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    /// Words in the block of `direction` within one half.
    #[inline]
    pub fn block_words(&self, direction: Direction) -> usize {
        match direction {
            Direction::Input => self.input_words,
            Direction::Output => self.output_words,
        }
    }

    #[inline]
    pub fn half_words(&self) -> usize {
        self.input_words + self.output_words
    }

    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// First word of the `direction` block inside `half`.
    #[inline]
    pub fn block_word_offset(&self, half: Half, direction: Direction) -> usize {
        let base = half.index() * self.half_words();
        match direction {
            Direction::Input => base,
            Direction::Output => base + self.input_words,
        }
    }

    #[inline]
    pub fn block_byte_offset(&self, half: Half, direction: Direction) -> usize {
        self.block_word_offset(half, direction) * self.sample_format.bytes_per_sample()
    }
}

/// The ping-pong buffer shared by the producer and the consumer.
pub struct PeriodBuffer {
    region: DmaRegion,
    layout: BufferLayout,
    dma_half: AtomicU8,
}

impl PeriodBuffer {
    /// Allocates a fresh DMA region sized for `layout`.
    pub fn allocate(layout: BufferLayout) -> Result<Self, AllocationError> {
        let region = DmaRegion::allocate(layout.total_bytes())?;
        Self::with_region(layout, region)
    }

    /// Wraps a region handed over by the hardware layer.
    pub fn with_region(layout: BufferLayout, region: DmaRegion) -> Result<Self, AllocationError> {
        if region.len() < layout.total_bytes() {
            return Err(AllocationError::RegionTooSmall {
                required: layout.total_bytes(),
                provided: region.len(),
            });
        }
        // Safety: exclusive ownership of the region, nothing shares it yet.
        unsafe { ptr::write_bytes(region.as_ptr(), 0, layout.total_bytes()) };

        Ok(Self {
            region,
            layout,
            dma_half: AtomicU8::new(Half::A as u8),
        })
    }

    #[inline]
    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    #[inline]
    pub fn region(&self) -> &DmaRegion {
        &self.region
    }

    /// Half the hardware is currently filling.
    #[inline]
    pub fn dma_half(&self) -> Half {
        Half::from_bit(self.dma_half.load(Ordering::Acquire))
    }

    /// Half holding the most recently completed period, owned by the consumer.
    #[inline]
    pub fn active_half(&self) -> Half {
        self.dma_half().other()
    }

    /// Hands the half the hardware just completed to the consumer.
    ///
    /// A single atomic toggle; safe from interrupt context.
    #[inline]
    pub fn flip(&self) {
        self.dma_half.fetch_xor(1, Ordering::AcqRel);
    }

    /// The whole region as sample words.
    #[inline]
    fn words(&self) -> &[AtomicU32] {
        let len = self.layout.total_bytes() / std::mem::size_of::<u32>();
        // Safety: the region is page aligned, at least `total_bytes` long and
        // lives as long as `self`. `AtomicU32` has the layout of `u32`, and
        // every access after construction goes through these atomics, so
        // concurrent hardware and consumer access is never a data race.
        unsafe { std::slice::from_raw_parts(self.region.as_ptr() as *const AtomicU32, len) }
    }

    /// The `direction` block of `half`.
    ///
    /// Any number of views may coexist. Which side should be touching a half
    /// is a protocol matter (see the module docs); violating it costs audio,
    /// not memory safety.
    #[inline]
    pub fn block(&self, half: Half, direction: Direction) -> SampleBlock<'_> {
        let offset = self.layout.block_word_offset(half, direction);
        SampleBlock::new(&self.words()[offset..offset + self.layout.block_words(direction)])
    }

    /// Silences the output block of both halves.
    pub(crate) fn clear_output(&self) {
        for half in [Half::A, Half::B] {
            self.block(half, Direction::Output).fill(0);
        }
    }
}

/// Shared view of one block of sample words.
///
/// Words are read and written with relaxed atomics; ordering between the
/// hardware and the consumer comes from [`PeriodBuffer::flip`] and the
/// completion signal.
#[derive(Clone, Copy)]
pub struct SampleBlock<'a> {
    words: &'a [AtomicU32],
}

impl<'a> SampleBlock<'a> {
    pub fn new(words: &'a [AtomicU32]) -> Self {
        Self { words }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// # Panics
    ///
    /// If `index` is out of bounds.
    #[inline]
    pub fn load(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::Relaxed)
    }

    /// # Panics
    ///
    /// If `index` is out of bounds.
    #[inline]
    pub fn store(&self, index: usize, value: u32) {
        self.words[index].store(value, Ordering::Relaxed);
    }

    pub fn fill(&self, value: u32) {
        for word in self.words {
            word.store(value, Ordering::Relaxed);
        }
    }

    /// Copies the block into the front of `dst`; returns the words copied.
    pub fn read_into(&self, dst: &mut [u32]) -> usize {
        let count = self.words.len().min(dst.len());
        for (out, word) in dst.iter_mut().zip(self.words) {
            *out = word.load(Ordering::Relaxed);
        }
        count
    }

    /// Copies `src` into the front of the block; returns the words copied.
    pub fn write_from(&self, src: &[u32]) -> usize {
        let count = self.words.len().min(src.len());
        for (word, value) in self.words.iter().zip(src) {
            word.store(*value, Ordering::Relaxed);
        }
        count
    }

    /// Copies as many words as both blocks hold from `src`.
    pub fn copy_from(&self, src: SampleBlock<'_>) -> usize {
        let count = self.words.len().min(src.words.len());
        for (word, value) in self.words.iter().zip(src.words) {
            word.store(value.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        count
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + 'a {
        self.words.iter().map(|word| word.load(Ordering::Relaxed))
    }

    pub fn as_atomic(&self) -> &'a [AtomicU32] {
        self.words
    }
}

impl std::fmt::Debug for SampleBlock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBlock")
            .field("len", &self.len())
            .finish()
    }
}

impl std::fmt::Debug for PeriodBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodBuffer")
            .field("layout", &self.layout)
            .field("dma_half", &self.dma_half())
            .finish()
    }
}

/// Zero-copy view of a session's period buffer for the consumer side.
///
/// The mapping stays valid after the session closes; it keeps the region
/// alive until the last mapping is dropped.
#[derive(Clone)]
pub struct BufferMapping {
    buffer: Arc<PeriodBuffer>,
}

impl BufferMapping {
    pub(crate) fn new(buffer: Arc<PeriodBuffer>) -> Self {
        Self { buffer }
    }

    /// Base address of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.buffer.region.as_ptr()
    }

    /// Bytes covered by both halves.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.layout.total_bytes()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes actually mapped, rounded up to whole pages.
    #[inline]
    pub fn mapped_len(&self) -> usize {
        self.buffer.region.len()
    }

    #[inline]
    pub fn layout(&self) -> BufferLayout {
        self.buffer.layout
    }

    #[inline]
    pub fn active_half(&self) -> Half {
        self.buffer.active_half()
    }

    /// Copies the `direction` block of `half` into `dst`.
    pub fn copy_from_half(
        &self,
        half: Half,
        direction: Direction,
        dst: &mut [u32],
    ) -> Result<usize, SessionError> {
        let words = self.buffer.layout.block_words(direction);
        if dst.len() < words {
            return Err(copy_fault(words, dst.len()));
        }
        Ok(self.buffer.block(half, direction).read_into(dst))
    }

    /// Copies `src` into the start of the `direction` block of `half`.
    pub fn copy_into_half(
        &self,
        half: Half,
        direction: Direction,
        src: &[u32],
    ) -> Result<usize, SessionError> {
        let words = self.buffer.layout.block_words(direction);
        if src.len() > words {
            return Err(copy_fault(src.len(), words));
        }
        Ok(self.buffer.block(half, direction).write_from(src))
    }
}

impl std::fmt::Debug for BufferMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferMapping")
            .field("len", &self.len())
            .field("mapped_len", &self.mapped_len())
            .finish()
    }
}

fn copy_fault(needed_words: usize, available_words: usize) -> SessionError {
    SessionError::CopyFault {
        needed: needed_words * 4,
        available: available_words * 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> BufferLayout {
        BufferLayout::new(64, 8, 8, SampleFormat::Int24LeftJustified).unwrap()
    }

    #[test]
    fn layout_places_output_after_input() {
        let layout = BufferLayout::new(16, 2, 4, SampleFormat::Int32).unwrap();
        assert_eq!(layout.half_words(), 16 * 6);
        assert_eq!(layout.block_word_offset(Half::A, Direction::Input), 0);
        assert_eq!(layout.block_word_offset(Half::A, Direction::Output), 32);
        assert_eq!(layout.block_word_offset(Half::B, Direction::Input), 96);
        assert_eq!(layout.block_byte_offset(Half::B, Direction::Output), 128 * 4);
        assert_eq!(layout.total_bytes(), 2 * 96 * 4);
    }

    #[test]
    fn empty_layout_is_rejected() {
        assert_eq!(
            BufferLayout::new(64, 0, 0, SampleFormat::Int32),
            Err(AllocationError::Empty)
        );
        assert!(matches!(
            BufferLayout::new(usize::MAX, 2, 2, SampleFormat::Int32),
            Err(AllocationError::Overflow { .. })
        ));
    }

    #[test]
    fn region_is_page_aligned_and_zeroed() {
        let region = DmaRegion::allocate(100).unwrap();
        assert_eq!(region.as_ptr() as usize % DMA_ALIGNMENT, 0);
        assert_eq!(region.len(), DMA_ALIGNMENT);
        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.len()) };
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn undersized_region_is_rejected() {
        let layout = BufferLayout::new(128, 8, 8, SampleFormat::Int32).unwrap();
        let region = DmaRegion::allocate(DMA_ALIGNMENT).unwrap();
        assert!(matches!(
            PeriodBuffer::with_region(layout, region),
            Err(AllocationError::RegionTooSmall { .. })
        ));
    }

    #[test]
    fn flip_toggles_ownership() {
        let buffer = PeriodBuffer::allocate(layout()).unwrap();
        assert_eq!(buffer.dma_half(), Half::A);
        assert_eq!(buffer.active_half(), Half::B);
        buffer.flip();
        assert_eq!(buffer.dma_half(), Half::B);
        assert_eq!(buffer.active_half(), Half::A);
        buffer.flip();
        assert_eq!(buffer.active_half(), Half::B);
    }

    #[test]
    fn blocks_do_not_overlap() {
        let buffer = PeriodBuffer::allocate(layout()).unwrap();
        buffer.block(Half::A, Direction::Output).fill(1);
        buffer.block(Half::B, Direction::Input).fill(2);
        assert!(buffer.block(Half::A, Direction::Input).iter().all(|w| w == 0));
        assert!(buffer.block(Half::A, Direction::Output).iter().all(|w| w == 1));
        assert!(buffer.block(Half::B, Direction::Input).iter().all(|w| w == 2));
        assert!(buffer.block(Half::B, Direction::Output).iter().all(|w| w == 0));
    }

    #[test]
    fn clear_output_leaves_input_alone() {
        let buffer = PeriodBuffer::allocate(layout()).unwrap();
        for half in [Half::A, Half::B] {
            buffer.block(half, Direction::Input).fill(3);
            buffer.block(half, Direction::Output).fill(4);
        }
        buffer.clear_output();
        for half in [Half::A, Half::B] {
            assert!(buffer.block(half, Direction::Input).iter().all(|w| w == 3));
            assert!(buffer.block(half, Direction::Output).iter().all(|w| w == 0));
        }
    }

    #[test]
    fn views_of_the_same_block_see_each_other() {
        let buffer = Arc::new(PeriodBuffer::allocate(layout()).unwrap());
        let mapping = BufferMapping::new(Arc::clone(&buffer));
        let held = buffer.block(Half::A, Direction::Output);
        held.store(0, 7);

        mapping
            .copy_into_half(Half::A, Direction::Output, &[99])
            .unwrap();
        assert_eq!(held.load(0), 99);
        assert_eq!(held.load(1), 0);
    }

    #[test]
    fn mapping_copies_blocks() {
        let buffer = Arc::new(PeriodBuffer::allocate(layout()).unwrap());
        let mapping = BufferMapping::new(Arc::clone(&buffer));
        let words = mapping.layout().block_words(Direction::Output);

        let src: Vec<u32> = (0..words as u32).collect();
        mapping
            .copy_into_half(Half::B, Direction::Output, &src)
            .unwrap();
        let mut dst = vec![0u32; words];
        let copied = mapping
            .copy_from_half(Half::B, Direction::Output, &mut dst)
            .unwrap();
        assert_eq!(copied, words);
        assert_eq!(dst, src);
    }

    #[test]
    fn mapping_reports_copy_faults() {
        let buffer = Arc::new(PeriodBuffer::allocate(layout()).unwrap());
        let mapping = BufferMapping::new(buffer);
        let mut short = vec![0u32; 3];
        let err = mapping
            .copy_from_half(Half::A, Direction::Input, &mut short)
            .unwrap_err();
        assert!(matches!(err, SessionError::CopyFault { needed, available } if needed == 64 * 8 * 4 && available == 12));

        let long = vec![0u32; 64 * 8 + 1];
        assert!(mapping
            .copy_into_half(Half::A, Direction::Input, &long)
            .is_err());
    }
}

use std::fmt;

use super::GpuError;

/// A point in the command queue's timeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FenceValue(pub u64);

impl FenceValue {
    pub const ZERO: FenceValue = FenceValue(0);

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        FenceValue(self.0 + 1)
    }
}

impl fmt::Display for FenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A GPU fence attached to one command queue.
pub trait GpuTimeline {
    /// Enqueue a signal of `value` behind all work submitted so far.
    fn signal(&self, value: FenceValue) -> Result<(), GpuError>;

    fn completed_value(&self) -> FenceValue;

    /// Block until the fence reaches `value`.
    fn wait_for(&self, value: FenceValue) -> Result<(), GpuError>;

    /// Per-frame throttle. Backends with a swap chain latency object wait on
    /// both the fence and the swap chain here.
    fn wait_for_frame(&self, value: FenceValue) -> Result<(), GpuError> {
        self.wait_for(value)
    }

    /// Swap chain latency wait alone, for frames whose fence already passed.
    fn wait_for_present(&self) -> Result<(), GpuError> {
        Ok(())
    }
}

/// One in-flight frame slot.
#[derive(Debug)]
pub struct FrameContext<A> {
    pub command_allocator: A,
    pub fence_value: FenceValue,
}

/// Owns the fence counter and the ring of frame contexts.
pub struct FrameSync<T, A> {
    timeline: T,
    frames: Vec<FrameContext<A>>,
    frame_index: usize,
    last_signaled: FenceValue,
}

impl<T: GpuTimeline, A> FrameSync<T, A> {
    pub fn new(timeline: T, allocators: Vec<A>) -> Result<Self, GpuError> {
        if allocators.is_empty() {
            return Err(GpuError::resource("frame contexts", "no command allocators"));
        }
        let last_signaled = timeline.completed_value();
        let frames = allocators
            .into_iter()
            .map(|command_allocator| FrameContext {
                command_allocator,
                fence_value: FenceValue::ZERO,
            })
            .collect();
        Ok(Self {
            timeline,
            frames,
            frame_index: 0,
            last_signaled,
        })
    }

    pub fn timeline(&self) -> &T {
        &self.timeline
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn current_frame(&self) -> &FrameContext<A> {
        &self.frames[self.frame_index]
    }

    pub fn last_signaled(&self) -> FenceValue {
        self.last_signaled
    }

    pub fn completed_value(&self) -> FenceValue {
        self.timeline.completed_value()
    }

    pub fn is_reached(&self, value: FenceValue) -> bool {
        self.timeline.completed_value() >= value
    }

    /// Signal the next fence value on the queue.
    pub fn signal(&mut self) -> Result<FenceValue, GpuError> {
        let value = self.last_signaled.next();
        self.timeline.signal(value)?;
        self.last_signaled = value;
        Ok(value)
    }

    /// Full stall: signal, then block until the GPU has caught up.
    pub fn signal_and_wait(&mut self) -> Result<FenceValue, GpuError> {
        let value = self.signal()?;
        if !self.is_reached(value) {
            self.timeline.wait_for(value)?;
        }
        Ok(value)
    }

    /// Block until the current slot's allocator may be reset.
    pub fn wait_for_next_frame(&mut self) -> Result<&mut FrameContext<A>, GpuError> {
        let value = self.frames[self.frame_index].fence_value;
        if !self.is_reached(value) {
            log::trace!("Waiting for frame slot {} (fence {})", self.frame_index, value);
            self.timeline.wait_for_frame(value)?;
        } else {
            self.timeline.wait_for_present()?;
        }
        Ok(&mut self.frames[self.frame_index])
    }

    /// Record the end of the current frame's submission and advance the ring.
    pub fn finish_frame(&mut self) -> Result<FenceValue, GpuError> {
        let value = self.signal()?;
        self.frames[self.frame_index].fence_value = value;
        self.frame_index = (self.frame_index + 1) % self.frames.len();
        Ok(value)
    }
}

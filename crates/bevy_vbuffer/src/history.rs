//! Bookkeeping for the V-buffer of the previous frame.
//!
//! Temporal reprojection reads the lighting buffer written last frame while
//! the current frame writes the other one. Two things have to be tracked:
//! which physical texture is which, and what layout the previous frame used.

use crate::vbuffer::VBufferParameters;

/// The number of frames of V-buffer state that are kept alive.
pub const VBUFFER_HISTORY_LENGTH: usize = 2;

/// Which of the two ping-ponged history resources to write and to read on a
/// given frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistorySlots {
    /// The slot written this frame.
    pub current: usize,
    /// The slot written last frame.
    pub previous: usize,
}

impl HistorySlots {
    /// Returns the slots for the given frame. The slots swap every frame.
    #[inline]
    pub fn for_frame(frame_index: u32) -> Self {
        let current = (frame_index & 1) as usize;
        HistorySlots {
            current,
            previous: current ^ 1,
        }
    }
}

/// The V-buffer layouts of the current and previous frames.
///
/// A view's V-buffer can be resized between frames, so reprojection needs to
/// know the layout the history was written with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VBufferHistory {
    // [current, previous]
    parameters: [VBufferParameters; VBUFFER_HISTORY_LENGTH],
    last_frame: Option<u32>,
}

impl VBufferHistory {
    /// Starts a new history.
    ///
    /// Both entries are set to `initial`, so the first frame reprojects onto
    /// itself.
    pub fn new(initial: VBufferParameters) -> Self {
        VBufferHistory {
            parameters: [initial; VBUFFER_HISTORY_LENGTH],
            last_frame: None,
        }
    }

    /// Records the layout for a new frame.
    ///
    /// The layout that was current becomes the previous one. Each frame must
    /// be recorded at most once.
    pub fn update(&mut self, frame_index: u32, parameters: VBufferParameters) {
        debug_assert_ne!(
            self.last_frame,
            Some(frame_index),
            "V-buffer history updated twice on frame {frame_index}"
        );

        if self.last_frame.is_some() {
            self.parameters[1] = self.parameters[0];
        } else {
            self.parameters[1] = parameters;
        }
        self.parameters[0] = parameters;
        self.last_frame = Some(frame_index);
    }

    /// The layout of the V-buffer written this frame.
    #[inline]
    pub fn current(&self) -> &VBufferParameters {
        &self.parameters[0]
    }

    /// The layout of the V-buffer written last frame.
    #[inline]
    pub fn previous(&self) -> &VBufferParameters {
        &self.parameters[1]
    }

    /// The frame passed to the most recent [`VBufferHistory::update`], if any.
    #[inline]
    pub fn last_frame(&self) -> Option<u32> {
        self.last_frame
    }

    /// Returns true if the previous frame's layout differs from this frame's,
    /// in which case the history has to be sampled with its own parameters.
    pub fn resized(&self) -> bool {
        self.parameters[0].extent() != self.parameters[1].extent()
    }
}

//! Sliding replay window over connection numbers
//!
//! Each materialized period keeps one window for its inbound direction. The
//! window is a 64-bit bitmap trailing up to a centre value: it covers the
//! 64 connection numbers ending at the centre (high edge = centre). A bit is
//! set if and only if that connection number has been accepted. The window
//! only ever moves forward.
//!
//! The trailing (rather than centred) geometry is a wire-compatibility
//! commitment shared with interoperating peers: a connection number more
//! than 64 behind the highest accepted one is unrecoverable.

use serde::{Deserialize, Serialize};

/// Number of connection numbers the window covers
pub const WINDOW_SIZE: u64 = 64;

/// Verdict for a connection number against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCheck {
    /// Unseen and acceptable (possibly sliding the window forward)
    Fresh,
    /// Below the low edge: too old to track, reject unconditionally
    BelowWindow,
    /// Already accepted once, reject
    Duplicate,
}

/// The bitmap-backed sliding structure that prevents a connection number
/// from being accepted twice.
///
/// `centre` is the highest connection number accepted so far (initially 0 as
/// a floor); bit `k` of the bitmap corresponds to connection number
/// `centre - k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayWindow {
    centre: u64,
    bitmap: u64,
}

impl ReplayWindow {
    /// A fresh window: centre at the initial floor, nothing seen.
    pub fn new() -> Self {
        Self { centre: 0, bitmap: 0 }
    }

    /// Rebuild a window from persisted state.
    pub fn from_parts(centre: u64, bitmap: u64) -> Self {
        Self { centre, bitmap }
    }

    /// The window's high edge: the highest connection number accepted so far.
    pub fn centre(&self) -> u64 {
        self.centre
    }

    /// Raw bitmap for persistence.
    pub fn bitmap(&self) -> u64 {
        self.bitmap
    }

    /// Classify a connection number without mutating the window.
    pub fn check(&self, connection: u64) -> WindowCheck {
        if connection > self.centre {
            return WindowCheck::Fresh;
        }
        let offset = self.centre - connection;
        if offset >= WINDOW_SIZE {
            return WindowCheck::BelowWindow;
        }
        if (self.bitmap >> offset) & 1 == 1 {
            WindowCheck::Duplicate
        } else {
            WindowCheck::Fresh
        }
    }

    /// Mark a connection number as accepted.
    ///
    /// If `connection` is above the high edge the window slides forward:
    /// the bitmap shifts by the difference, bits falling off the low edge
    /// are discarded, freshly exposed bits are clear, and the centre becomes
    /// `connection`. Callers must have obtained [`WindowCheck::Fresh`] for
    /// `connection` first.
    pub fn record(&mut self, connection: u64) {
        if connection > self.centre {
            let shift = connection - self.centre;
            self.bitmap = if shift >= WINDOW_SIZE { 0 } else { self.bitmap << shift };
            self.centre = connection;
            self.bitmap |= 1;
        } else {
            let offset = self.centre - connection;
            debug_assert!(offset < WINDOW_SIZE, "record() called below the window");
            if offset < WINDOW_SIZE {
                self.bitmap |= 1 << offset;
            }
        }
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}

//! Audio focus
//!
//! The platform arbitrates which application may play. The engine asks for
//! focus before every start or resume and gives it up on user pause and stop.
//! Changes decided by the platform come back through
//! [`PlaybackEngine::on_focus_change`](super::PlaybackEngine::on_focus_change).

/// Focus change reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Gain,
    /// Another application took over for good
    Loss,
    /// Another application plays for a short while
    LossTransient,
    /// A short interruption we may play under at reduced volume
    LossTransientCanDuck,
}

pub trait AudioFocus: Send {
    /// Returns false when the platform denies focus
    fn request(&mut self) -> bool;

    fn abandon(&mut self);
}

/// Focus arbiter for platforms without one: always granted
#[derive(Debug, Default)]
pub struct NoFocus;

impl AudioFocus for NoFocus {
    fn request(&mut self) -> bool {
        true
    }

    fn abandon(&mut self) {}
}

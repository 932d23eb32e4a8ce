//! Notifier collaborator contract.
//!
//! Implemented outside the core (terminal bell, system notification, web
//! audio). Hooks are fire-and-forget: an implementation must swallow its own
//! failures rather than error back into the session service. The one
//! reportable failure is audio-context resume, which `start` surfaces as a
//! non-fatal warning.

use crate::error::AudioResumeError;
use crate::events::Event;

pub trait Notifier: Send {
    /// A segment ran down to zero. `event` is `Event::SegmentCompleted`.
    fn segment_completed(&self, event: &Event);

    /// The full iteration cycle finished. Fired in addition to
    /// `segment_completed`, only at the wrap.
    fn cycle_completed(&self, event: &Event);

    /// Invoked when the countdown starts. Failure is surfaced to the caller
    /// as a warning; the countdown starts regardless.
    fn resume_audio(&self) -> Result<(), AudioResumeError> {
        Ok(())
    }
}

/// Notifier that does nothing. Headless and test use.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn segment_completed(&self, _event: &Event) {}

    fn cycle_completed(&self, _event: &Event) {}
}

//! Timed session state machine
//!
//! Pure transitions in the Elm style: `transition(state, context, event)`
//! returns the next state plus the effects the runtime must perform. The
//! first settlement trigger moves a running session to `Finalizing`; every
//! later trigger is ignored, which is what guarantees a single submission.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{
    SessionContext, SessionKind, SessionState, SessionStatus, SettlementTrigger, SubmissionStatus,
};
pub use transition::{transition, TransitionError, TransitionResult};

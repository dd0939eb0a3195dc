//! Restyler core: pure generation state machine and view-model helpers.
//!
//! Nothing in this crate performs IO. The engine feeds [`Msg`] values observed
//! at its suspension points into [`update`] and executes the returned
//! [`Effect`]s.
mod effect;
mod failure;
mod msg;
mod state;
mod update;
mod view_model;

pub use effect::{DiagnosticEvent, Effect};
pub use failure::{truncate_body, AttemptFailure, MAX_ERROR_BODY_CHARS};
pub use msg::Msg;
pub use state::{GenerationState, Outcome, Phase, SessionId, Strategy, TOKEN_CEILING};
pub use update::update;
pub use view_model::SessionView;

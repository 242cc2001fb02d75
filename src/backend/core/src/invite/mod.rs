//! Inviting users into a tenant.

pub mod acceptance;
pub mod workflow;

pub use acceptance::{AcceptRequest, Acceptance, InviteAcceptance};
pub use workflow::{
    InviteFailure, InviteInput, InviteResult, InviteSaga, RunRecord, RunStatus, Submission,
    STEP_CHECK_SELF_INVITE, STEP_GRANT_PENDING_INVITE, STEP_RESOLVE_IDENTITY,
    STEP_SEND_NOTIFICATION,
};

mod calendar;
mod checkpoint;
pub mod error;
mod ids;
mod productivity;
mod scalar;
mod typed_event;
mod whiteboard;

pub use calendar::{Proposal, ProposalStatus, ShadowCalendarEvent, SyncToken};
pub use checkpoint::{Checkpoint, SideEffectKey};
pub use error::{Error, Result};
pub use ids::{ParseWbIdError, ThreadId, UserId, WbId};
pub use productivity::{HeuristicRecord, InputStreamOffset};
pub use scalar::{Scalar, ScalarMap};
pub use typed_event::{
    CalendarImpact, CalendarPlanNewVersion, CalendarPlanProposed, EmailReplyNeeded, Envelope,
    EventSource, ManagerPrompt, ManagerUserAction, ProdBlockEvent, TypedEvent, UserChoice,
};
pub use whiteboard::{ControlChannel, InputStreamRole, WhiteboardEvent};

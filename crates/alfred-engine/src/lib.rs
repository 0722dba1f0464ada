// Engine: the Manager Graph (C4) and the Normalizer (C3) that feeds it.
// This layer sits between the raw whiteboard (alfred-core) and the
// subagents/runtime that assemble its collaborators (alfred-agents,
// alfred-runtime).

mod graph;
mod normalizer;

pub use graph::{
    run_graph, GraphDeps, GraphError, GraphOutcome, MailControlSink, MailSendConfirmed,
    PlannerCollaborator, PlannerRequest, PlannerResponse, ProdControlSink, ProdRecalcSignal,
    WhiteboardSink,
};
pub use normalizer::{normalize, NormalizeError};

//! HTTP handlers, split by the external collaborator that calls them:
//! `workflow` serves the client/GUI/CLI surface, `distributor`
//! serves the Coordinator surface the Distributor process calls.

pub mod distributor;
pub mod workflow;

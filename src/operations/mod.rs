//! The portal's long-running operations, each wired through the workflow
//! runner. Remote calls sit behind the collaborator traits.

pub mod batch_delete;
pub mod export;
pub mod upload;

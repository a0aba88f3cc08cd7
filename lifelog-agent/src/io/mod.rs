//! Collaborator seams and file-backed inputs.

pub mod collaborators;
pub mod config;
pub mod safety;
pub mod scenario;

//! This module defines and re-exports the interfaces for the engagement repository.
//! It serves as a central point for accessing traits related to data interaction.
mod engagement;

pub use engagement::EngagementRepository;

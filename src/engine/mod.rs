//! Core engine — placement, settlement and the loops that drive them.

pub mod desk;
pub mod placement;
pub mod poller;
pub mod settlement;

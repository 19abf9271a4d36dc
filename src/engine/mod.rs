//! Core engine: the scan → evaluate → commit → mark cycle and its collaborators.

pub mod accountant;
pub mod decision;
pub mod market_data;
pub mod scanner;
pub mod status;

//! API handlers module

pub mod batches;
pub mod extraction;
pub mod health;
pub mod review;

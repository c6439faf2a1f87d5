//! Pipeline core: shared status surface, consensus hooks, and the
//! orchestration control loop.

pub mod hooks;
pub mod orchestrator;
pub mod state;

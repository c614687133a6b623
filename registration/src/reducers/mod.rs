//! Reducers - the functional core of the engine.

pub mod lifecycle;

pub use lifecycle::{LifecycleEnvironment, LifecycleReducer};

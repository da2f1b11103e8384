//! Disruptors: the objects a script interacts with.
//!
//! A disruptor is built over a set of targets, injects the agent into each
//! of them at construction, and then translates fault-injection calls into
//! agent commands fanned out across the set. Fault-injection calls block for
//! the full fault duration; callers that need to generate load while the
//! fault is active invoke them from a concurrent task.

mod pod;
mod service;

pub use pod::{PodDisruptor, PodDisruptorOptions};
pub use service::{ServiceDisruptor, ServiceDisruptorOptions};

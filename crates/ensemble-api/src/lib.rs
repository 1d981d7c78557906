//! Document model for ensemble.
//!
//! This crate holds the types shared by the graph builder and the runtime:
//! the `ResourceGroup` document, the vocabulary of a synthesized instance
//! (states, conditions, owner labels), and small helpers for working with
//! unstructured platform objects.

pub mod group;
pub mod instance;
pub mod labels;
pub mod meta;
pub mod unstructured;

pub use group::{ResourceDefinition, ResourceGroup, ResourceGroupSpec, SchemaDefinition};
pub use instance::{InstanceState, CONDITION_INSTANCE_SYNCED};
pub use meta::{GroupVersionKind, ObjectRef};

/// API group owning every synthesized instance kind.
pub const GROUP: &str = "ensemble.dev";

pub(crate) mod counter;
pub(crate) mod counter_set;
pub(crate) mod error;
pub(crate) mod integration;
pub(crate) mod node;
pub(crate) mod reader;
pub(crate) mod registry;

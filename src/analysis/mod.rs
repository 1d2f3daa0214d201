//! Data flow analyses over method bodies.

pub(crate) mod const_source;
pub(crate) mod dataflow;
pub(crate) mod field_write;
pub(crate) mod frame;
pub(crate) mod int_value;
pub(crate) mod live_variable;
pub(crate) mod this_value;

//! Input/output formats at the edge of the binary.

pub mod bus;
pub mod csv;

//! Reading and writing of mesh files.

pub mod exfile;

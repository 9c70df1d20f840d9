//! lunet core types: values, strings and tables shared by the compiler and the VM.

pub mod string;
pub mod table;
pub mod value;

//! Tree-sitter based Python source handling.

mod python;

pub use python::{dedent, ClassDef, FunctionDef, PythonFile, Scope};

//! The exception hierarchy and the host-side error type that carries it
//! until it's turned into a catchable guest `Instance`.
//!
//! Every variant here is a subclass of the single root `Exception` class the
//! guest sees; `class_name()` is what picks the builtin class an
//! `except ExceptionType` clause filters against.

use thiserror::Error;

use crate::value::Value;

#[derive(Error, Clone)]
pub enum VmError {
    #[error("TypeException: {0}")]
    Type(String),
    #[error("NameException: {0}")]
    Name(String),
    #[error("FieldException: {0}")]
    Field(String),
    #[error("MethodException: {0}")]
    Method(String),
    #[error("ImportException: {0}")]
    Import(String),
    #[error("StackOverflowException: {0}")]
    StackOverflow(String),
    #[error("IndexOutOfBoundException: {0}")]
    IndexOutOfBound(String),
    #[error("AssertException: {0}")]
    Assert(String),
    #[error("InvalidArgException: {0}")]
    InvalidArg(String),
    #[error("NotImplementedException: {0}")]
    NotImplemented(String),
    #[error("SyntaxException: {0}")]
    Syntax(String),
    #[error("ProgramInterrupt: {0}")]
    Interrupt(String),
    /// A guest-raised exception whose payload is already a built `Instance`
    /// value (from an explicit `raise` statement), passed through verbatim.
    #[error("exception")]
    Guest(GuestExc),
}

/// Wraps a guest `Value` so it can ride inside `VmError` without requiring
/// `Value` itself to implement `std::error::Error`.
#[derive(Debug, Clone)]
pub struct GuestExc(pub Value);

impl std::fmt::Debug for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl VmError {
    pub fn class_name(&self) -> &'static str {
        match self {
            VmError::Type(_) => "TypeException",
            VmError::Name(_) => "NameException",
            VmError::Field(_) => "FieldException",
            VmError::Method(_) => "MethodException",
            VmError::Import(_) => "ImportException",
            VmError::StackOverflow(_) => "StackOverflowException",
            VmError::IndexOutOfBound(_) => "IndexOutOfBoundException",
            VmError::Assert(_) => "AssertException",
            VmError::InvalidArg(_) => "InvalidArgException",
            VmError::NotImplemented(_) => "NotImplementedException",
            VmError::Syntax(_) => "SyntaxException",
            VmError::Interrupt(_) => "ProgramInterrupt",
            VmError::Guest(_) => "Exception",
        }
    }

    pub fn message(&self) -> String {
        match self {
            VmError::Guest(_) => String::new(),
            other => other.to_string(),
        }
    }
}

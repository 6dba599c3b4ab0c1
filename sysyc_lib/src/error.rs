/// A fatal backend failure. None of these are recoverable; the driver
/// aborts compilation and surfaces the diagnostic.
///
/// The one recoverable condition of the design (an immediate that fails the
/// Operand2 encoding test) is handled inline by materializing the value
/// with `mov`/`movt` and never reaches this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// A call references a function the package doesn't declare.
    UnknownFunction(String),
    /// A logic assertion failed; this is a bug in the backend itself.
    Unreachable(&'static str),
    /// A placeholder was reached at compile time.
    NotImplemented(&'static str),
    /// A block carries the invalid `Undefined` terminator.
    UndefinedTerminator { function: String, block: u32 },
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::UnknownFunction(name) => {
                write!(f, "call to unknown function `{name}`")
            }
            BackendError::Unreachable(what) => {
                write!(f, "internal backend invariant violated: {what}")
            }
            BackendError::NotImplemented(what) => write!(f, "not implemented: {what}"),
            BackendError::UndefinedTerminator { function, block } => {
                write!(f, "undefined terminator in `{function}`, block {block}")
            }
        }
    }
}

impl std::error::Error for BackendError {}

pub type Result<T> = std::result::Result<T, BackendError>;

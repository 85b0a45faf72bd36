//! Error codes and the error-handler callback

use core::fmt;

/// Failure codes shared by the code holder, emitters, and the IR builder.
///
/// Every fallible operation returns one of these; an emitter additionally
/// latches the first error it sees (see [`Emitter::last_error`]) and
/// refuses further mutation until [`Emitter::reset_last_error`] is called.
///
/// [`Emitter::last_error`]: crate::emitter::Emitter::last_error
/// [`Emitter::reset_last_error`]: crate::emitter::Emitter::reset_last_error
#[derive(Eq, Copy, Clone, Debug, PartialEq, Hash)]
pub enum Error {
    /// An arena or pool refused the allocation (budget exhausted).
    NoHeapMemory,
    /// Label id out of range, unregistered, or not a label operand.
    InvalidLabel,
    /// Architecture mismatch, or attaching to an uninitialized holder.
    InvalidArch,
    /// Operation not legal in the current state (double attach, rebinding
    /// a bound label, `end_func` with no open function, detached emitter).
    InvalidState,
    /// A physical register was passed where a virtual one is required.
    InvalidVirtId,
    /// Holder already carries initialized code info.
    AlreadyInitialized,
    /// Holder was never initialized.
    NotInitialized,
    /// Malformed argument (operand count, section name, offset range).
    InvalidArgument,
    /// A jump references a label that was never bound.
    UnboundLabel,
}

impl Error {
    #[inline]
    pub const fn description(self) -> &'static str {
        match self {
            Self::NoHeapMemory => "no heap memory",
            Self::InvalidLabel => "invalid label",
            Self::InvalidArch => "invalid architecture",
            Self::InvalidState => "invalid state",
            Self::InvalidVirtId => "invalid virtual register id",
            Self::AlreadyInitialized => "already initialized",
            Self::NotInitialized => "not initialized",
            Self::InvalidArgument => "invalid argument",
            Self::UnboundLabel => "unbound label",
        }
    }
}

impl fmt::Display for Error {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl std::error::Error for Error {}

/// Callback consulted before an emitter stores its last error.
///
/// Returning `true` means the error was reported elsewhere: the emitter
/// will not enter the error state, though the error code is still
/// returned to the immediate caller.
pub trait ErrorHandler {
    fn handle_error(&mut self, err: Error, message: &str) -> bool;
}

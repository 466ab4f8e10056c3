use thiserror::Error;

use crate::ir::TypeRef;

/// Builds an [`Error::Malformed`] carrying the source location of the caller.
macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Builds an [`Error::OutOfBounds`].
macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// Builds an [`Error::MalformedBody`] carrying the source location of the caller.
macro_rules! malformed_body {
    ($msg:expr) => {
        crate::Error::MalformedBody {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::MalformedBody {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Builds an [`Error::InvalidEdit`] carrying the source location of the caller.
macro_rules! invalid_edit {
    ($msg:expr) => {
        crate::Error::InvalidEdit {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidEdit {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// A class-initialisation cycle.
///
/// Static initialisers of the classes in `chain` (in order) trigger each other, and the
/// last element equals the first. Code that moves static initialisation work around
/// (such as the outliner placing helpers into classes) must not add edges to such a
/// cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("class initialization cycle through {} classes", chain.len().saturating_sub(1))]
pub struct CycleDetected {
    /// The offending class chain, closed (first == last).
    pub chain: Vec<TypeRef>,
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Structural Errors
/// - [`Error::MalformedBody`] - A method body could not be turned into a CFG
/// - [`Error::InvalidEdit`] - A CFG mutation would have broken a CFG invariant
/// - [`Error::EncodingOverflow`] - An operand does not fit any container encoding
///
/// ## Pipeline Errors
/// - [`Error::UnsatisfiedRequirement`] - Static validation of a pass list failed
/// - [`Error::PassFatal`] - A pass aborted the pipeline
/// - [`Error::CycleDetected`] - A class initialisation cycle was found
///
/// ## Codec Errors
/// - [`Error::Malformed`] - Encoded input (LEB128, MUTF-8, prefix sets) is corrupt
/// - [`Error::OutOfBounds`] - A read went past the end of the input
///
/// # Examples
///
/// ```rust
/// use dexopt::Error;
///
/// fn report(err: &Error) -> &'static str {
///     match err {
///         Error::UnsatisfiedRequirement { .. } => "bad pipeline",
///         Error::PassFatal { .. } => "pass failed",
///         _ => "other",
///     }
/// }
/// # let _ = report;
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A method body is internally inconsistent.
    ///
    /// Raised while building a CFG from a linear body: unmatched labels, unbalanced try
    /// regions or operands that exceed the limits of the IR.
    #[error("Malformed body - {file}:{line}: {message}")]
    MalformedBody {
        /// Description of the inconsistency
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A structural edit on a CFG would violate one of its invariants.
    ///
    /// This always indicates a bug in the calling pass.
    #[error("Invalid edit - {file}:{line}: {message}")]
    InvalidEdit {
        /// Description of the rejected edit
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An operand or register can not be encoded within the container format limits.
    #[error("Encoding overflow: {0}")]
    EncodingOverflow(String),

    /// A pass requires a property or analysis that is not available at its position in
    /// the pipeline.
    #[error("Pass '{pass}' requires '{requirement}', which is not established at this point")]
    UnsatisfiedRequirement {
        /// Name of the pass whose requirement failed
        pass: String,
        /// Name of the missing property or analysis
        requirement: String,
    },

    /// A pass signalled that it can not proceed.
    #[error("Pass '{pass}' failed: {reason}")]
    PassFatal {
        /// Name of the failing pass
        pass: String,
        /// Human readable reason
        reason: String,
    },

    /// A class initialisation cycle.
    #[error(transparent)]
    CycleDetected(#[from] CycleDetected),

    /// Encoded data is damaged and could not be decoded.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while decoding.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// A second definition was added for an already defined reference.
    #[error("Duplicate definition of {0}")]
    DuplicateDefinition(String),

    /// Configuration could not be bound.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Wrapped JSON error from binding a configuration value.
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    /// Failed to lock target.
    #[error("Failed to lock target")]
    LockError,
}

impl Error {
    /// Returns `true` for errors a transformation may swallow by abandoning the rewrite.
    #[must_use]
    pub fn is_encoding_overflow(&self) -> bool {
        matches!(self, Error::EncodingOverflow(_))
    }
}

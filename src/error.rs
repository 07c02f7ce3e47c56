use std::path::PathBuf;
use std::{error, fmt, io};

//------------ Error ---------------------------------------------------------

/// A program error.
///
/// Such errors are highly likely to halt the program.
pub struct Error {
    info: Box<Information>,
}

/// Information about an error.
struct Information {
    /// The primary error message.
    primary: PrimaryError,

    /// Layers of context to the error.
    ///
    /// Ordered from innermost to outermost.
    context: Vec<Box<str>>,
}

impl Information {
    fn other(info: &str) -> Self {
        Information {
            primary: PrimaryError::Other(info.into()),
            context: Vec::new(),
        }
    }

    fn clap(info: clap::Error) -> Self {
        Information {
            primary: PrimaryError::Clap(info),
            context: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum PrimaryError {
    Clap(clap::Error),
    Other(Box<str>),
}

impl fmt::Display for PrimaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryError::Clap(e) => e.fmt(f),
            PrimaryError::Other(e) => e.fmt(f),
        }
    }
}

//--- Interaction

impl Error {
    /// Construct a new error from a string.
    pub fn new(error: &str) -> Self {
        Self {
            info: Box::new(Information::other(error)),
        }
    }

    /// Add context to this error.
    pub fn context(mut self, context: &str) -> Self {
        self.info.context.push(context.into());
        self
    }

    /// Pretty-print this error.
    pub fn pretty_print(&self, env: impl crate::env::Env) {
        let mut err = env.stderr();

        let info = match &self.info.primary {
            // Clap errors are already styled. We don't want our own pretty
            // styling around that and context does not make sense for command
            // line arguments either. So we just print the styled string that
            // clap produces and return.
            PrimaryError::Clap(e) => {
                writeln!(err, "{}", e.render().ansi());
                return;
            }
            PrimaryError::Other(error) => error,
        };

        let prog = std::env::args().next().unwrap_or_else(|| "keyroll".into());
        writeln!(err, "[{prog}] ERROR: {info}");
        for context in &self.info.context {
            writeln!(err, "\n... while {context}");
        }
    }

    pub fn exit_code(&self) -> u8 {
        // Clap uses the exit code 2 and we want to keep that, but we aren't
        // actually returning the clap error, so we replicate that behaviour
        // here.
        if let PrimaryError::Clap(e) = &self.info.primary {
            e.exit_code() as u8
        } else {
            1
        }
    }
}

//--- Conversions for '?'

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Self::new(error)
    }
}

impl From<String> for Error {
    fn from(error: String) -> Self {
        Self::new(&error)
    }
}

impl From<fmt::Error> for Error {
    fn from(error: fmt::Error) -> Self {
        Self::new(&error.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Self::new(&error.to_string())
    }
}

impl From<clap::Error> for Error {
    fn from(value: clap::Error) -> Self {
        Error {
            info: Box::new(Information::clap(value)),
        }
    }
}

impl From<KeyError> for Error {
    fn from(value: KeyError) -> Self {
        Self::new(&value.to_string())
    }
}

//--- Display, Debug

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.info.primary.fmt(f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("primary", &self.info.primary)
            .field("context", &self.info.context)
            .finish()
    }
}

//--- Error

impl error::Error for Error {}

//------------ Result --------------------------------------------------------

/// A program result.
pub type Result<T> = core::result::Result<T, Error>;

/// An extension trait for [`Result`]s using [`Error`].
pub trait Context: Sized {
    /// Add context for an error.
    fn context(self, context: &str) -> Self;

    /// Add context for an error, lazily.
    fn with_context(self, context: impl FnOnce() -> String) -> Self;
}

impl<T> Context for Result<T> {
    fn context(self, context: &str) -> Self {
        self.map_err(|err| err.context(context))
    }

    fn with_context(self, context: impl FnOnce() -> String) -> Self {
        self.map_err(|err| err.context(&(context)()))
    }
}

//------------ FileOp --------------------------------------------------------

/// One file-system step of a multi-step mutation.
///
/// Status transitions and similar operations consist of several file-system
/// steps that are not performed transactionally. When one of them fails, the
/// resulting [`KeyError::Io`] names the step so that callers (and tests) can
/// tell exactly how far the mutation got.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileOp {
    Scan,
    Read,
    Create,
    Write,
    Link,
    Unlink,
    Rename,
    Touch,
    Copy,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileOp::Scan => "scanning",
            FileOp::Read => "reading",
            FileOp::Create => "creating",
            FileOp::Write => "writing",
            FileOp::Link => "linking",
            FileOp::Unlink => "unlinking",
            FileOp::Rename => "renaming",
            FileOp::Touch => "touching",
            FileOp::Copy => "copying",
        })
    }
}

//------------ KeyError ------------------------------------------------------

/// An error from the key management engine.
#[derive(Debug)]
pub enum KeyError {
    /// A malformed key filename or key-file body.
    Parse(String),

    /// A key lookup matched nothing where exactly one match was required.
    NotFound,

    /// A key lookup matched more than one key where exactly one match was
    /// required.
    Ambiguous,

    /// A file-system step failed; prior on-disk state is left in place up to
    /// the step that failed.
    Io {
        op: FileOp,
        path: PathBuf,
        source: io::Error,
    },

    /// The external key generator failed or produced unusable output.
    Generation(String),

    /// An on-disk coordination artifact holds a value that should be
    /// unreachable, such as a parent file with a phase outside 1..=2.
    CorruptState(String),

    /// The external zone signer failed or did not report success.
    Signing(String),
}

impl KeyError {
    pub fn io(op: FileOp, path: impl Into<PathBuf>, source: io::Error) -> Self {
        KeyError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Parse(msg) => write!(f, "parse error: {msg}"),
            KeyError::NotFound => f.write_str("no matching key found"),
            KeyError::Ambiguous => f.write_str("more than one key matches"),
            KeyError::Io { op, path, source } => {
                write!(f, "error {op} '{}': {source}", path.display())
            }
            KeyError::Generation(msg) => write!(f, "key generation failed: {msg}"),
            KeyError::CorruptState(msg) => write!(f, "corrupt state: {msg}"),
            KeyError::Signing(msg) => write!(f, "zone signing failed: {msg}"),
        }
    }
}

impl error::Error for KeyError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            KeyError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

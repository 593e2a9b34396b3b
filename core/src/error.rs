//! Error types surfaced by the datapath core (spec §7).

use std::fmt::Display;

/// A POSIX-errno-flavored reason code attached to parse and connection
/// failures. `Unknown` corresponds to `errno == 0` in spec §4.C / §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrnoKind {
    Inval,
    NoMem,
    ConnReset,
    TimedOut,
    BrokenPipe,
    Again,
    Unknown,
}

impl ErrnoKind {
    /// The `<reason>` string used in wire-format error messages (spec §6).
    pub fn reason(self) -> &'static str {
        match self {
            ErrnoKind::Inval => "invalid argument",
            ErrnoKind::NoMem => "out of memory",
            ErrnoKind::ConnReset => "connection reset by peer",
            ErrnoKind::TimedOut => "operation timed out",
            ErrnoKind::BrokenPipe => "broken pipe",
            ErrnoKind::Again => "resource temporarily unavailable",
            ErrnoKind::Unknown => "unknown",
        }
    }
}

impl Display for ErrnoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// Errors the datapath core can return from its public operations.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The mbuf pool or message pool is exhausted (spec §7 `OutOfMemory`).
    #[error("mbuf pool exhausted")]
    OutOfMemory,

    /// A message allocation was refused because the hard ceiling
    /// (`MAX_ALLOC_MSGS`) was reached.
    #[error("message pool exhausted (hard ceiling reached)")]
    PoolExhausted,

    /// An external-mode allocation was refused because the soft ceiling
    /// (`ALLOWED_ALLOC_MSGS`) was reached while internal traffic still has
    /// headroom.
    #[error("external allocation refused above soft ceiling")]
    AllocLimitReached,

    /// A parse failure in external mode; connection-fatal (spec §7).
    #[error("parse error: {0}")]
    Parse(ErrnoKind),

    /// A fatal, non-EAGAIN I/O failure; connection-fatal (spec §7).
    #[error("fatal I/O error: {0}")]
    IoFatal(String),

    /// `pre_splitcopy`/`post_splitcopy` failed during fragmentation or
    /// parse-driven splitting.
    #[error("split/copy hook failed: {0}")]
    SplitCopy(String),

    /// The configuration carries an invalid tunable (e.g. soft ceiling above
    /// hard ceiling).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Outcome of a non-blocking I/O attempt (spec §5: "Suspension points...
/// return EAGAIN, which is treated as an OK quiescent signal"). Kept
/// distinct from [`CoreError`] so call sites do not have to match on an
/// `Err` variant for a condition that is not actually an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Bytes were moved (read or written); `usize` is the count.
    Moved(usize),
    /// The operation would block; the loop should exit quiescently.
    Again,
}

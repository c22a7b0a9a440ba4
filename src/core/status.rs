use serde::{Deserialize, Serialize};
use std::fmt;

/// Judge status
///
/// Declaration order is the severity order: aggregating several results keeps
/// the greatest one. Discriminants are the numeric codes reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Status {
    Waiting = 0,
    Accepted = 1,
    WrongAnswer = 2,
    TimeLimitExceeded = 3,
    MemoryLimitExceeded = 4,
    OutputLimitExceeded = 5,
    RuntimeError = 6,
    CompileError = 7,
    SystemError = 8,
    Canceled = 9,
    Etc = 10,
    Hacked = 11,
    Judging = 20,
    Compiling = 21,
    Fetched = 22,
    Ignored = 30,
    FormatError = 31,
    HackSuccessful = 32,
    HackUnsuccessful = 33,
}

impl Status {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_accepted(self) -> bool {
        self == Status::Accepted
    }

    /// Worse of two statuses
    pub fn worst(self, other: Status) -> Status {
        self.max(other)
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Waiting
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Waiting => "waiting",
            Status::Accepted => "accepted",
            Status::WrongAnswer => "wrong_answer",
            Status::TimeLimitExceeded => "time_limit_exceeded",
            Status::MemoryLimitExceeded => "memory_limit_exceeded",
            Status::OutputLimitExceeded => "output_limit_exceeded",
            Status::RuntimeError => "runtime_error",
            Status::CompileError => "compile_error",
            Status::SystemError => "system_error",
            Status::Canceled => "canceled",
            Status::Etc => "etc",
            Status::Hacked => "hacked",
            Status::Judging => "judging",
            Status::Compiling => "compiling",
            Status::Fetched => "fetched",
            Status::Ignored => "ignored",
            Status::FormatError => "format_error",
            Status::HackSuccessful => "hack_successful",
            Status::HackUnsuccessful => "hack_unsuccessful",
        };
        write!(f, "{}", s)
    }
}

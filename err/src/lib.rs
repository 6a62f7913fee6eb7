#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(IoError),
    #[error("FS: {0}")]
    Fs(FsError),
}

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("device transfer short: expected {expected} block(s), got {actual}")]
    ShortTransfer { expected: u64, actual: u64 },
    #[error("underlying storage error: {0}")]
    Backend(String),
}

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("invalid path")]
    InvalidPath,
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("name exceeds the maximum length")]
    NameTooLong,
    #[error("no space left on volume")]
    NoSpace,
    #[error("no free file control blocks")]
    NoFcb,
    #[error("invalid file descriptor")]
    BadFd,
    #[error("file not opened for reading")]
    NotReadable,
    #[error("file not opened for writing")]
    NotWritable,
    #[error("volume is not formatted or is inconsistent")]
    Inconsistent,
    #[error("negative seek position")]
    NegativeSeek,
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<FsError> for Error {
    fn from(e: FsError) -> Self {
        Error::Fs(e)
    }
}

pub type Result<T> = core::result::Result<T, Error>;

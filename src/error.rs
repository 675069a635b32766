use std::io;
use std::num::ParseIntError;

use thiserror::Error;

use crate::Cookie;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("descriptor pool exhausted")]
    OutOfResources,
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
    #[error("no stable hardware progress reading")]
    Timeout,
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
    #[error("channel busy")]
    Busy,
    #[error("hardware fault on transfer {cookie}")]
    HardwareFault { cookie: Cookie },
    #[error("mapping device memory failed")]
    Mmap,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    ParseInt(#[from] ParseIntError),
}

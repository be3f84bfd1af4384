use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum Error {
    UnknownError = -1,
    InitFailure = -2,
    IOFailure = -3,
    InvalidData = -4,
    InvalidSeek = -5,
    InvalidHandle = -6,
    ReadFailure = -7,
    WriteFailure = -8,
    EntryNotFound = -9,
    EndOfFile = -10,
    Permissions = -11,
    InvalidExecutable = -12,
    InvalidEntryPoint = -13,
    TruncatedImage = -14,
    OutOfMemory = -15,
}

impl Error {
    pub fn code(&self) -> i64 {
        *self as i64
    }

    pub fn from_code(code: i64) -> Result<usize, Error> {
        if code < 0 {
            if let Some(err) = FromPrimitive::from_i64(code) {
                Err(err)
            } else {
                Err(Error::UnknownError)
            }
        } else {
            Ok(code as usize)
        }
    }
}

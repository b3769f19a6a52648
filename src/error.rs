use std::fmt;

#[derive(Debug)]
pub enum Error {
    InvalidRequest(String),
    UndefinedVariable(String),
    NestingTooDeep { kind: &'static str, limit: usize },
    BsonRawError(bson::raw::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BsonRawError(e) => write!(f, "{}", e),
            Error::InvalidRequest(reason) => write!(f, "{}", reason),
            Error::UndefinedVariable(name) => {
                write!(f, "Use of undefined variable: {}", name)
            }
            Error::NestingTooDeep { kind, limit } => {
                write!(f, "{} exceeds the maximum nesting depth of {}", kind, limit)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<bson::raw::Error> for Error {
    fn from(err: bson::raw::Error) -> Self {
        Error::BsonRawError(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

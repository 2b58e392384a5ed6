use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("{0}")]
    Resolution(String),
    #[error("{0}")]
    Type(String),
    #[error("{0}")]
    Structural(String),
    #[error("{0}")]
    Internal(String),
}

impl CompileError {
    pub fn message(&self) -> &str {
        match self {
            CompileError::Resolution(msg) => msg,
            CompileError::Type(msg) => msg,
            CompileError::Structural(msg) => msg,
            CompileError::Internal(msg) => msg,
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

#[macro_export]
macro_rules! resolution_error {
    ($i:expr,$($t:tt)*) => {
        Err($crate::utils::err::CompileError::Resolution($i.error_msg(format!($($t)*))))
    }
}

#[macro_export]
macro_rules! type_error {
    ($i:expr,$($t:tt)*) => {
        Err($crate::utils::err::CompileError::Type($i.error_msg(format!($($t)*))))
    }
}

#[macro_export]
macro_rules! structural_error {
    ($i:expr,$($t:tt)*) => {
        Err($crate::utils::err::CompileError::Structural($i.error_msg(format!($($t)*))))
    }
}

#[macro_export]
macro_rules! internal_error {
    ($i:expr,$($t:tt)*) => {
        Err($crate::utils::err::CompileError::Internal($i.error_msg(format!($($t)*))))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::info::Info;

    #[test]
    fn error_macro_formats_location() {
        let i = Info::new(2, 5);
        let e: CompileResult<()> = type_error!(i, "incompatible types");
        assert_eq!(e, Err(CompileError::Type("2:5: incompatible types".to_string())));
    }

    #[test]
    fn error_display_is_message() {
        let e = CompileError::Resolution("unknown identifier x".to_string());
        assert_eq!(e.to_string(), "unknown identifier x");
        assert_eq!(e.message(), "unknown identifier x");
    }
}

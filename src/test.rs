use crate::utils::err::CompileResult;

use std::fmt::Debug;

pub fn assert_error_matches<T: Debug>(res: CompileResult<T>, msg: &str) {
    match res {
        Ok(v) => panic!("Expected an error containing {msg:?}, got {v:?}"),
        Err(e) => {
            assert!(
                e.to_string().contains(msg),
                "Error {e} does not contain {msg:?}"
            );
        }
    }
}

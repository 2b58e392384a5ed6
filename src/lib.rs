pub mod ast;
pub mod option;
pub mod spirv;
pub mod utils;

#[cfg(test)]
pub mod test;

pub use ast::sanitize;
pub use option::{ModuleResolver, SanitizeOptions};
pub use spirv::{generate, SpirvEnv};
pub use utils::err::{CompileError, CompileResult};

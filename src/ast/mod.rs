pub mod ast;
mod constant_fold;
mod pprint;
mod sanitizer;
mod split_branches;
mod type_check;

#[cfg(test)]
pub mod ast_builder;

use ast::Module;
use crate::option::SanitizeOptions;
use crate::utils::debug::DebugEnv;
use crate::utils::err::CompileResult;

// Resolves, type-checks and specializes a module. The input tree is never
// mutated, so the same module can be sanitized repeatedly under different
// option values.
pub fn sanitize(module: &Module, opts: &SanitizeOptions) -> CompileResult<Module> {
    let debug_env = DebugEnv::new();
    let module = sanitizer::apply(module.clone(), opts)?;
    debug_env.print("AST after sanitization", &module);
    if opts.split_multiple_branches {
        let module = split_branches::apply(module);
        debug_env.print("AST after splitting branch chains", &module);
        Ok(module)
    } else {
        Ok(module)
    }
}

use crate::ast::ast::{ConstValue, Module};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

// Resolves an import path to the module it names. Injected by the caller so
// the sanitizer stays agnostic of how modules are stored.
pub trait ModuleResolver {
    fn resolve(&self, path: &str) -> Option<Module>;
}

#[derive(Clone, Default)]
pub struct SanitizeOptions {
    // Continue past unresolved names instead of failing. Type and arity
    // errors stay fatal.
    pub allow_partial_sanitization: bool,
    pub make_variable_name_unique: bool,
    pub reduce_loops_to_while: bool,
    pub remove_aliases: bool,
    pub remove_const_declaration: bool,
    pub remove_compound_assignments: bool,
    pub remove_matrix_cast: bool,
    pub remove_option_declaration: bool,
    pub remove_scalar_swizzling: bool,
    pub split_multiple_branches: bool,
    pub use_identifier_accesses_for_structs: bool,
    // Concrete values to specialize options with, keyed by option name.
    pub option_values: BTreeMap<String, ConstValue>,
    // Names the variable renamer must avoid colliding with.
    pub reserved_identifiers: BTreeSet<String>,
    pub module_resolver: Option<Rc<dyn ModuleResolver>>,
}

impl SanitizeOptions {
    // The option set with every desugaring enabled, leaving only the node
    // kinds a code generator has to handle.
    pub fn full_desugar() -> SanitizeOptions {
        SanitizeOptions {
            make_variable_name_unique: true,
            reduce_loops_to_while: true,
            remove_aliases: true,
            remove_const_declaration: true,
            remove_compound_assignments: true,
            remove_matrix_cast: true,
            remove_option_declaration: true,
            remove_scalar_swizzling: true,
            split_multiple_branches: true,
            ..SanitizeOptions::default()
        }
    }
}

impl fmt::Debug for SanitizeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SanitizeOptions")
            .field("allow_partial_sanitization", &self.allow_partial_sanitization)
            .field("make_variable_name_unique", &self.make_variable_name_unique)
            .field("reduce_loops_to_while", &self.reduce_loops_to_while)
            .field("remove_aliases", &self.remove_aliases)
            .field("remove_const_declaration", &self.remove_const_declaration)
            .field("remove_compound_assignments", &self.remove_compound_assignments)
            .field("remove_matrix_cast", &self.remove_matrix_cast)
            .field("remove_option_declaration", &self.remove_option_declaration)
            .field("remove_scalar_swizzling", &self.remove_scalar_swizzling)
            .field("split_multiple_branches", &self.split_multiple_branches)
            .field(
                "use_identifier_accesses_for_structs",
                &self.use_identifier_accesses_for_structs
            )
            .field("option_values", &self.option_values)
            .field("reserved_identifiers", &self.reserved_identifiers)
            .field("module_resolver", &self.module_resolver.is_some())
            .finish()
    }
}

use super::pprint::PrettyPrint;

use std::env;

// Prints intermediate trees between passes when the SILICA_DEBUG environment
// variable is set to a non-zero value.
pub struct DebugEnv {
    enabled: bool,
}

impl DebugEnv {
    pub fn new() -> DebugEnv {
        let enabled = env::var("SILICA_DEBUG")
            .map(|v| !v.is_empty() && v != "0")
            .unwrap_or(false);
        DebugEnv {enabled}
    }

    pub fn print<T: PrettyPrint>(&self, header: &str, t: &T) {
        if self.enabled {
            eprintln!("{header}:\n{0}", t.pprint_default());
        }
    }
}

impl Default for DebugEnv {
    fn default() -> Self {
        DebugEnv::new()
    }
}

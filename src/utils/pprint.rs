use itertools::Itertools;

#[derive(Clone, Debug, Default)]
pub struct PrettyPrintEnv {
    pub indent: usize,
}

impl PrettyPrintEnv {
    pub fn new() -> PrettyPrintEnv {
        PrettyPrintEnv::default()
    }

    pub fn incr_indent(self) -> Self {
        PrettyPrintEnv {indent: self.indent + 2}
    }

    pub fn decr_indent(self) -> Self {
        PrettyPrintEnv {indent: self.indent.saturating_sub(2)}
    }

    pub fn print_indent(&self) -> String {
        " ".repeat(self.indent)
    }
}

pub trait PrettyPrint {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String);

    fn pprint_default(&self) -> String {
        let (_, s) = self.pprint(PrettyPrintEnv::new());
        s
    }
}

pub fn pprint_iter<'a, T: PrettyPrint + 'a>(
    it: impl Iterator<Item = &'a T>,
    env: PrettyPrintEnv,
    separator: &str
) -> (PrettyPrintEnv, String) {
    let (env, strs) = it.fold((env, vec![]), |(env, mut strs), v| {
        let (env, s) = v.pprint(env);
        strs.push(s);
        (env, strs)
    });
    let s = strs.into_iter().join(separator);
    (env, s)
}

#[cfg(test)]
mod test {
    use super::*;

    struct Word(&'static str);

    impl PrettyPrint for Word {
        fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
            (env, self.0.to_string())
        }
    }

    #[test]
    fn pprint_iter_joins() {
        let words = vec![Word("a"), Word("b"), Word("c")];
        let (_, s) = pprint_iter(words.iter(), PrettyPrintEnv::new(), ", ");
        assert_eq!(s, "a, b, c");
    }

    #[test]
    fn indentation_is_balanced() {
        let env = PrettyPrintEnv::new().incr_indent().incr_indent();
        assert_eq!(env.print_indent().len(), 4);
        let env = env.decr_indent();
        assert_eq!(env.print_indent().len(), 2);
    }
}

use super::ast::*;
use crate::utils::smap::*;

// Rewrites else-if chains into nested single-branch ifs, so that downstream
// consumers only ever see branches with exactly one condition.
fn split_stmt(s: Stmt) -> Stmt {
    let s = SMapAccum::<Stmt>::smap(s, split_stmt);
    match s {
        Stmt::Branch {branches, els, is_const, i} if branches.len() > 1 => {
            let mut it = branches.into_iter();
            let first = it.next().unwrap();
            let rest = it.collect::<Vec<CondBranch>>();
            let inner = split_stmt(Stmt::Branch {
                branches: rest, els, is_const, i: i.clone()
            });
            Stmt::Branch {
                branches: vec![first],
                els: Some(Box::new(inner)),
                is_const,
                i
            }
        },
        s => s
    }
}

pub fn apply(module: Module) -> Module {
    let stmts = module.stmts.into_iter().map(split_stmt).collect::<Vec<Stmt>>();
    Module {stmts}
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::ast_builder::*;

    fn chain() -> Stmt {
        Stmt::Branch {
            branches: vec![
                CondBranch {cond: var(0, Type::bool()), body: Stmt::NoOp {i: i()}},
                CondBranch {cond: var(1, Type::bool()), body: Stmt::NoOp {i: i()}},
            ],
            els: Some(Box::new(Stmt::Discard {i: i()})),
            is_const: false,
            i: i()
        }
    }

    #[test]
    fn chain_becomes_nested() {
        let m = apply(module(vec![fun("f", vec![], Type::Void, vec![chain()])]));
        let body = match &m.stmts[0] {
            Stmt::DeclareFunction {v} => &v.body,
            s => panic!("Unexpected statement {s:?}")
        };
        match &body[0] {
            Stmt::Branch {branches, els, ..} => {
                assert_eq!(branches.len(), 1);
                match els.as_deref() {
                    Some(Stmt::Branch {branches, els, ..}) => {
                        assert_eq!(branches.len(), 1);
                        assert!(matches!(els.as_deref(), Some(Stmt::Discard {..})));
                    },
                    s => panic!("Unexpected else {s:?}")
                }
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn single_branch_unchanged() {
        let s = branch(var(0, Type::bool()), Stmt::NoOp {i: i()}, None);
        let m = apply(module(vec![fun("f", vec![], Type::Void, vec![s.clone()])]));
        match &m.stmts[0] {
            Stmt::DeclareFunction {v} => assert_eq!(v.body[0], s),
            s => panic!("Unexpected statement {s:?}")
        }
    }
}

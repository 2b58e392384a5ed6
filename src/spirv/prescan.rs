use crate::ast::ast::*;
use crate::internal_error;
use crate::utils::err::*;
use crate::utils::info::InfoNode;
use crate::utils::smap::SFold;

use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct LocalVar {
    pub idx: usize,
    pub name: String,
    pub ty: Type,
}

// Everything the generator needs to know about a module before emitting a
// single instruction: the struct registry, the external resources, which
// extended instruction sets intrinsics pull in, and the local variables of
// every function.
pub struct ModuleInfo {
    pub structs: Vec<StructDesc>,
    pub externals: Vec<ExternalVar>,
    pub needs_glsl_ext: bool,
    pub locals: BTreeMap<usize, Vec<LocalVar>>,
}

fn intrinsic_needs_ext(op: &IntrinsicOp) -> bool {
    match op {
        IntrinsicOp::CrossProduct | IntrinsicOp::Exp | IntrinsicOp::Length |
        IntrinsicOp::Max | IntrinsicOp::Min | IntrinsicOp::Normalize |
        IntrinsicOp::Pow | IntrinsicOp::Reflect => true,
        // The dot product and texture sampling are core instructions.
        IntrinsicOp::DotProduct | IntrinsicOp::SampleTexture => false,
    }
}

fn expr_uses_ext(acc: bool, e: &Expr) -> bool {
    let acc = acc || matches!(e, Expr::Intrinsic {op, ..} if intrinsic_needs_ext(op));
    SFold::<Expr>::sfold(e, acc, expr_uses_ext)
}

fn stmt_uses_ext(acc: bool, s: &Stmt) -> bool {
    let acc = SFold::<Expr>::sfold(s, acc, expr_uses_ext);
    SFold::<Stmt>::sfold(s, acc, stmt_uses_ext)
}

fn collect_locals(acc: CompileResult<Vec<LocalVar>>, s: &Stmt) -> CompileResult<Vec<LocalVar>> {
    let mut acc = acc?;
    if let Stmt::DeclareVariable {name, idx, ty, i, ..} = s {
        match idx {
            Some(idx) => acc.push(LocalVar {
                idx: *idx,
                name: name.clone(),
                ty: ty.clone()
            }),
            None => return internal_error!(i, "Unresolved variable \
                declaration reached code generation")
        }
    }
    SFold::<Stmt>::sfold_result(s, Ok(acc), |acc, child| {
        collect_locals(Ok(acc), child)
    })
}

// Collects every function declaration in the order their indices were
// assigned. Imports splice their declarations into nested multi-statements,
// so the walk has to recurse through statement wrappers.
pub fn collect_functions(stmts: &[Stmt]) -> Vec<&FunDecl> {
    fn walk<'m>(acc: Vec<&'m FunDecl>, s: &'m Stmt) -> Vec<&'m FunDecl> {
        match s {
            Stmt::DeclareFunction {v} => {
                let mut acc = acc;
                acc.push(v);
                acc
            },
            Stmt::Multi {stmts, ..} => stmts.iter().fold(acc, walk),
            _ => acc
        }
    }
    stmts.iter().fold(vec![], walk)
}

fn scan_stmt(info: CompileResult<ModuleInfo>, s: &Stmt) -> CompileResult<ModuleInfo> {
    let mut info = info?;
    match s {
        Stmt::DeclareStruct {idx, desc, i} => {
            match idx {
                Some(idx) if *idx == info.structs.len() => {
                    info.structs.push(desc.clone());
                },
                _ => return internal_error!(i, "Struct {0} has an unresolved \
                    or out-of-order index", desc.name)
            }
            Ok(info)
        },
        Stmt::DeclareExternal {vars, i} => {
            for v in vars {
                if v.idx.is_none() {
                    return internal_error!(i, "External {0} has no resolved \
                        variable index", v.name);
                }
                info.externals.push(v.clone());
            }
            Ok(info)
        },
        Stmt::DeclareFunction {v} => {
            let idx = match v.idx {
                Some(idx) => idx,
                None => return internal_error!(v.i, "Function {0} has no \
                    resolved index", v.name)
            };
            let locals = v.body.sfold_result(Ok(vec![]), |acc, s| {
                collect_locals(Ok(acc), s)
            })?;
            info.locals.insert(idx, locals);
            info.needs_glsl_ext = v.body.iter()
                .fold(info.needs_glsl_ext, stmt_uses_ext);
            Ok(info)
        },
        Stmt::Multi {stmts, ..} => {
            stmts.sfold_result(Ok(info), |info, s| scan_stmt(Ok(info), s))
        },
        Stmt::NoOp {..} | Stmt::DeclareConst {..} | Stmt::DeclareOption {..} |
        Stmt::DeclareAlias {..} => Ok(info),
        s => {
            let i = s.get_info();
            internal_error!(i, "Statement kind not expected at module scope \
                during code generation")
        }
    }
}

pub fn scan(module: &Module) -> CompileResult<ModuleInfo> {
    let info = ModuleInfo {
        structs: vec![],
        externals: vec![],
        needs_glsl_ext: false,
        locals: BTreeMap::new(),
    };
    module.stmts.sfold_result(Ok(info), |info, s| scan_stmt(Ok(info), s))
}

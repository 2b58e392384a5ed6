use super::ast::*;
use crate::utils::info::Info;

pub fn i() -> Info {
    Info::default()
}

pub fn int(v: i32) -> Expr {
    Expr::Const {v: ConstValue::Int {v}, ty: Type::int(), i: i()}
}

pub fn uint(v: u32) -> Expr {
    Expr::Const {v: ConstValue::UInt {v}, ty: Type::uint(), i: i()}
}

pub fn float(v: f32) -> Expr {
    Expr::Const {v: ConstValue::Float {v}, ty: Type::float(), i: i()}
}

pub fn bool_expr(v: bool) -> Expr {
    Expr::Const {v: ConstValue::Bool {v}, ty: Type::bool(), i: i()}
}

pub fn fvec(comps: Vec<f32>) -> Expr {
    let ty = Type::vec(comps.len(), Primitive::Float);
    Expr::Const {v: ConstValue::FVec {comps}, ty, i: i()}
}

pub fn ident(name: &str) -> Expr {
    Expr::Ident {name: name.to_string(), ty: Type::Unknown, i: i()}
}

pub fn var(idx: usize, ty: Type) -> Expr {
    Expr::VarRef {idx, ty, i: i()}
}

pub fn binop(lhs: Expr, op: BinOp, rhs: Expr, ty: Type) -> Expr {
    Expr::BinOp {lhs: Box::new(lhs), op, rhs: Box::new(rhs), ty, i: i()}
}

pub fn unop(op: UnOp, arg: Expr, ty: Type) -> Expr {
    Expr::UnOp {op, arg: Box::new(arg), ty, i: i()}
}

pub fn assign(lhs: Expr, rhs: Expr) -> Expr {
    Expr::Assign {
        op: AssignOp::Assign,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        ty: Type::Unknown,
        i: i()
    }
}

pub fn expr_stmt(e: Expr) -> Stmt {
    Stmt::Expr {e, i: i()}
}

pub fn decl_var(name: &str, ty: Type, init: Option<Expr>) -> Stmt {
    Stmt::DeclareVariable {name: name.to_string(), idx: None, ty, init, i: i()}
}

pub fn decl_const(name: &str, init: Expr) -> Stmt {
    Stmt::DeclareConst {
        name: name.to_string(), idx: None, ty: Type::Unknown, init, i: i()
    }
}

pub fn decl_option(name: &str, ty: Type, default: Option<Expr>) -> Stmt {
    Stmt::DeclareOption {name: name.to_string(), idx: None, ty, default, i: i()}
}

pub fn param(name: &str, ty: Type) -> Param {
    Param {name: name.to_string(), ty, idx: None, i: i()}
}

pub fn fun(name: &str, params: Vec<Param>, ret: Type, body: Vec<Stmt>) -> Stmt {
    Stmt::DeclareFunction {v: FunDecl {
        name: name.to_string(),
        idx: None,
        params,
        ret,
        entry: None,
        depth_write: None,
        early_fragment_tests: None,
        body,
        i: i()
    }}
}

pub fn entry_fun(
    name: &str,
    stage: ShaderStage,
    params: Vec<Param>,
    ret: Type,
    body: Vec<Stmt>
) -> Stmt {
    match fun(name, params, ret, body) {
        Stmt::DeclareFunction {mut v} => {
            v.entry = Some(stage);
            Stmt::DeclareFunction {v}
        },
        _ => unreachable!()
    }
}

pub fn member(name: &str, ty: Type) -> StructMember {
    StructMember {
        name: name.to_string(), ty, builtin: None, cond: None,
        location: None, i: i()
    }
}

pub fn decl_struct(name: &str, members: Vec<StructMember>) -> Stmt {
    Stmt::DeclareStruct {
        idx: None,
        desc: StructDesc {name: name.to_string(), members},
        i: i()
    }
}

pub fn branch(cond: Expr, body: Stmt, els: Option<Stmt>) -> Stmt {
    Stmt::Branch {
        branches: vec![CondBranch {cond, body}],
        els: els.map(Box::new),
        is_const: false,
        i: i()
    }
}

pub fn ret(value: Option<Expr>) -> Stmt {
    Stmt::Return {value, i: i()}
}

pub fn module(stmts: Vec<Stmt>) -> Module {
    Module {stmts}
}

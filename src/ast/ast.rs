use crate::utils::info::*;
use crate::utils::smap::*;

use strum_macros::EnumIter;
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, EnumIter)]
pub enum Primitive {
    #[default] Bool,
    Float,
    Int,
    UInt,
}

impl Primitive {
    pub fn is_numeric(&self) -> bool {
        match self {
            Primitive::Float | Primitive::Int | Primitive::UInt => true,
            Primitive::Bool => false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TextureDim {
    E1D,
    #[default] E2D,
    E3D,
    Cube,
}

impl TextureDim {
    // Number of coordinates required to sample a texture of this dimension.
    pub fn coordinate_count(&self) -> usize {
        match self {
            TextureDim::E1D => 1,
            TextureDim::E2D => 2,
            TextureDim::E3D | TextureDim::Cube => 3,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, EnumIter)]
pub enum Type {
    #[default] Unknown,
    Void,
    Primitive {ty: Primitive},
    Vector {dim: usize, elem: Primitive},
    Matrix {cols: usize, rows: usize, elem: Primitive},
    Array {elem: Box<Type>, len: usize},
    Sampler {dim: TextureDim, sampled: Primitive},
    Uniform {inner: Box<Type>},
    Struct {idx: usize},
    Function {idx: usize},
    Named {name: String},
}

impl Type {
    pub fn primitive(ty: Primitive) -> Type {
        Type::Primitive {ty}
    }

    pub fn bool() -> Type {
        Type::Primitive {ty: Primitive::Bool}
    }

    pub fn float() -> Type {
        Type::Primitive {ty: Primitive::Float}
    }

    pub fn int() -> Type {
        Type::Primitive {ty: Primitive::Int}
    }

    pub fn uint() -> Type {
        Type::Primitive {ty: Primitive::UInt}
    }

    pub fn vec(dim: usize, elem: Primitive) -> Type {
        Type::Vector {dim, elem}
    }

    pub fn is_unknown(&self) -> bool {
        *self == Type::Unknown
    }

    pub fn is_bool(&self) -> bool {
        *self == Type::bool()
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Type::Primitive {..})
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Type::Vector {..})
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, Type::Matrix {..})
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Primitive {ty: Primitive::Int | Primitive::UInt})
    }

    // The scalar element of a primitive or vector type.
    pub fn elem_primitive(&self) -> Option<Primitive> {
        match self {
            Type::Primitive {ty} => Some(*ty),
            Type::Vector {elem, ..} => Some(*elem),
            _ => None
        }
    }

    // Number of scalar components, for the types a cast may target.
    pub fn component_count(&self) -> Option<usize> {
        match self {
            Type::Primitive {..} => Some(1),
            Type::Vector {dim, ..} => Some(*dim),
            Type::Matrix {cols, rows, ..} => Some(cols * rows),
            _ => None
        }
    }
}

#[derive(Clone, Debug)]
pub enum ConstValue {
    Bool {v: bool},
    Int {v: i32},
    UInt {v: u32},
    Float {v: f32},
    FVec {comps: Vec<f32>},
    IVec {comps: Vec<i32>},
}

impl ConstValue {
    pub fn discriminator(&self) -> u8 {
        match self {
            ConstValue::Bool {..} => 0,
            ConstValue::Int {..} => 1,
            ConstValue::UInt {..} => 2,
            ConstValue::Float {..} => 3,
            ConstValue::FVec {..} => 4,
            ConstValue::IVec {..} => 5,
        }
    }

    pub fn value_type(&self) -> Type {
        match self {
            ConstValue::Bool {..} => Type::bool(),
            ConstValue::Int {..} => Type::int(),
            ConstValue::UInt {..} => Type::uint(),
            ConstValue::Float {..} => Type::float(),
            ConstValue::FVec {comps} => Type::vec(comps.len(), Primitive::Float),
            ConstValue::IVec {comps} => Type::vec(comps.len(), Primitive::Int),
        }
    }

    pub fn get_bool_value(&self) -> Option<bool> {
        match self {
            ConstValue::Bool {v} => Some(*v),
            _ => None
        }
    }
}

impl Default for ConstValue {
    fn default() -> ConstValue {
        ConstValue::Bool {v: false}
    }
}

impl Ord for ConstValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ConstValue::Bool {v: lv}, ConstValue::Bool {v: rv}) => lv.cmp(rv),
            (ConstValue::Int {v: lv}, ConstValue::Int {v: rv}) => lv.cmp(rv),
            (ConstValue::UInt {v: lv}, ConstValue::UInt {v: rv}) => lv.cmp(rv),
            (ConstValue::Float {v: lv}, ConstValue::Float {v: rv}) =>
                f32::total_cmp(lv, rv),
            (ConstValue::FVec {comps: lc}, ConstValue::FVec {comps: rc}) => {
                lc.len().cmp(&rc.len())
                    .then_with(|| {
                        lc.iter()
                            .zip(rc.iter())
                            .map(|(l, r)| f32::total_cmp(l, r))
                            .find(|o| *o != Ordering::Equal)
                            .unwrap_or(Ordering::Equal)
                    })
            },
            (ConstValue::IVec {comps: lc}, ConstValue::IVec {comps: rc}) => lc.cmp(rc),
            (lhs, rhs) => lhs.discriminator().cmp(&rhs.discriminator())
        }
    }
}

impl PartialOrd for ConstValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ConstValue {
    fn eq(&self, other: &ConstValue) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ConstValue {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum BinOp {
    #[default] Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Leq,
    Gt,
    Geq,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnOp {
    #[default] Neg,
    Plus,
    Not,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum AssignOp {
    #[default] Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
}

impl AssignOp {
    // The binary operation a compound assignment expands into.
    pub fn binary_op(&self) -> Option<BinOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::AddAssign => Some(BinOp::Add),
            AssignOp::SubAssign => Some(BinOp::Sub),
            AssignOp::MulAssign => Some(BinOp::Mul),
            AssignOp::DivAssign => Some(BinOp::Div),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SwizzleComponent {
    #[default] X,
    Y,
    Z,
    W,
}

impl SwizzleComponent {
    pub fn index(&self) -> usize {
        match self {
            SwizzleComponent::X => 0,
            SwizzleComponent::Y => 1,
            SwizzleComponent::Z => 2,
            SwizzleComponent::W => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, EnumIter)]
pub enum IntrinsicOp {
    #[default] CrossProduct,
    DotProduct,
    Exp,
    Length,
    Max,
    Min,
    Normalize,
    Pow,
    Reflect,
    SampleTexture,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuiltinVar {
    Position,
    FragCoord,
    FragDepth,
    VertexIndex,
    InstanceIndex,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DepthWriteMode {
    Replace,
    Greater,
    Less,
    Unchanged,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FuncTarget {
    Named {name: String},
    Decl {idx: usize},
}

impl Default for FuncTarget {
    fn default() -> FuncTarget {
        FuncTarget::Named {name: String::new()}
    }
}

#[derive(Clone, Debug, PartialEq, EnumIter)]
pub enum Expr {
    Ident {name: String, ty: Type, i: Info},
    AccessIdent {target: Box<Expr>, field: String, ty: Type, i: Info},
    AccessIndex {target: Box<Expr>, index: Box<Expr>, ty: Type, i: Info},
    Assign {op: AssignOp, lhs: Box<Expr>, rhs: Box<Expr>, ty: Type, i: Info},
    BinOp {lhs: Box<Expr>, op: BinOp, rhs: Box<Expr>, ty: Type, i: Info},
    UnOp {op: UnOp, arg: Box<Expr>, ty: Type, i: Info},
    Swizzle {target: Box<Expr>, comps: Vec<SwizzleComponent>, ty: Type, i: Info},
    Cast {target_ty: Type, args: Vec<Expr>, ty: Type, i: Info},
    IfExpr {cond: Box<Expr>, thn: Box<Expr>, els: Box<Expr>, ty: Type, i: Info},
    Call {func: FuncTarget, args: Vec<Expr>, ty: Type, i: Info},
    MethodCall {target: Box<Expr>, method: String, args: Vec<Expr>, ty: Type, i: Info},
    Intrinsic {op: IntrinsicOp, args: Vec<Expr>, ty: Type, i: Info},
    Const {v: ConstValue, ty: Type, i: Info},
    ConstRef {idx: usize, ty: Type, i: Info},
    VarRef {idx: usize, ty: Type, i: Info},
    FuncRef {idx: usize, ty: Type, i: Info},
    StructRef {idx: usize, ty: Type, i: Info},
}

impl Expr {
    pub fn discriminator(&self) -> u8 {
        match self {
            Expr::Ident {..} => 0,
            Expr::AccessIdent {..} => 1,
            Expr::AccessIndex {..} => 2,
            Expr::Assign {..} => 3,
            Expr::BinOp {..} => 4,
            Expr::UnOp {..} => 5,
            Expr::Swizzle {..} => 6,
            Expr::Cast {..} => 7,
            Expr::IfExpr {..} => 8,
            Expr::Call {..} => 9,
            Expr::MethodCall {..} => 10,
            Expr::Intrinsic {..} => 11,
            Expr::Const {..} => 12,
            Expr::ConstRef {..} => 13,
            Expr::VarRef {..} => 14,
            Expr::FuncRef {..} => 15,
            Expr::StructRef {..} => 16,
        }
    }

    pub fn get_type<'a>(&'a self) -> &'a Type {
        match self {
            Expr::Ident {ty, ..} => ty,
            Expr::AccessIdent {ty, ..} => ty,
            Expr::AccessIndex {ty, ..} => ty,
            Expr::Assign {ty, ..} => ty,
            Expr::BinOp {ty, ..} => ty,
            Expr::UnOp {ty, ..} => ty,
            Expr::Swizzle {ty, ..} => ty,
            Expr::Cast {ty, ..} => ty,
            Expr::IfExpr {ty, ..} => ty,
            Expr::Call {ty, ..} => ty,
            Expr::MethodCall {ty, ..} => ty,
            Expr::Intrinsic {ty, ..} => ty,
            Expr::Const {ty, ..} => ty,
            Expr::ConstRef {ty, ..} => ty,
            Expr::VarRef {ty, ..} => ty,
            Expr::FuncRef {ty, ..} => ty,
            Expr::StructRef {ty, ..} => ty,
        }
    }

    pub fn get_const_value(&self) -> Option<&ConstValue> {
        match self {
            Expr::Const {v, ..} => Some(v),
            _ => None
        }
    }
}

impl Default for Expr {
    fn default() -> Expr {
        Expr::Ident {name: String::new(), ty: Type::default(), i: Info::default()}
    }
}

impl InfoNode for Expr {
    fn get_info(&self) -> Info {
        match self {
            Expr::Ident {i, ..} => i.clone(),
            Expr::AccessIdent {i, ..} => i.clone(),
            Expr::AccessIndex {i, ..} => i.clone(),
            Expr::Assign {i, ..} => i.clone(),
            Expr::BinOp {i, ..} => i.clone(),
            Expr::UnOp {i, ..} => i.clone(),
            Expr::Swizzle {i, ..} => i.clone(),
            Expr::Cast {i, ..} => i.clone(),
            Expr::IfExpr {i, ..} => i.clone(),
            Expr::Call {i, ..} => i.clone(),
            Expr::MethodCall {i, ..} => i.clone(),
            Expr::Intrinsic {i, ..} => i.clone(),
            Expr::Const {i, ..} => i.clone(),
            Expr::ConstRef {i, ..} => i.clone(),
            Expr::VarRef {i, ..} => i.clone(),
            Expr::FuncRef {i, ..} => i.clone(),
            Expr::StructRef {i, ..} => i.clone(),
        }
    }
}

impl SMapAccum<Expr> for Expr {
    fn smap_accum_l_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, Expr) -> Result<(A, Expr), E>
    ) -> Result<(A, Expr), E> {
        match self {
            Expr::AccessIdent {target, field, ty, i} => {
                let (acc, target) = f(acc?, *target)?;
                Ok((acc, Expr::AccessIdent {target: Box::new(target), field, ty, i}))
            },
            Expr::AccessIndex {target, index, ty, i} => {
                let (acc, target) = f(acc?, *target)?;
                let (acc, index) = f(acc, *index)?;
                Ok((acc, Expr::AccessIndex {
                    target: Box::new(target), index: Box::new(index), ty, i
                }))
            },
            Expr::Assign {op, lhs, rhs, ty, i} => {
                let (acc, lhs) = f(acc?, *lhs)?;
                let (acc, rhs) = f(acc, *rhs)?;
                Ok((acc, Expr::Assign {
                    op, lhs: Box::new(lhs), rhs: Box::new(rhs), ty, i
                }))
            },
            Expr::BinOp {lhs, op, rhs, ty, i} => {
                let (acc, lhs) = f(acc?, *lhs)?;
                let (acc, rhs) = f(acc, *rhs)?;
                Ok((acc, Expr::BinOp {
                    lhs: Box::new(lhs), op, rhs: Box::new(rhs), ty, i
                }))
            },
            Expr::UnOp {op, arg, ty, i} => {
                let (acc, arg) = f(acc?, *arg)?;
                Ok((acc, Expr::UnOp {op, arg: Box::new(arg), ty, i}))
            },
            Expr::Swizzle {target, comps, ty, i} => {
                let (acc, target) = f(acc?, *target)?;
                Ok((acc, Expr::Swizzle {target: Box::new(target), comps, ty, i}))
            },
            Expr::Cast {target_ty, args, ty, i} => {
                let (acc, args) = args.smap_accum_l_result(acc, &f)?;
                Ok((acc, Expr::Cast {target_ty, args, ty, i}))
            },
            Expr::IfExpr {cond, thn, els, ty, i} => {
                let (acc, cond) = f(acc?, *cond)?;
                let (acc, thn) = f(acc, *thn)?;
                let (acc, els) = f(acc, *els)?;
                Ok((acc, Expr::IfExpr {
                    cond: Box::new(cond), thn: Box::new(thn), els: Box::new(els), ty, i
                }))
            },
            Expr::Call {func, args, ty, i} => {
                let (acc, args) = args.smap_accum_l_result(acc, &f)?;
                Ok((acc, Expr::Call {func, args, ty, i}))
            },
            Expr::MethodCall {target, method, args, ty, i} => {
                let (acc, target) = f(acc?, *target)?;
                let (acc, args) = args.smap_accum_l_result(Ok(acc), &f)?;
                Ok((acc, Expr::MethodCall {target: Box::new(target), method, args, ty, i}))
            },
            Expr::Intrinsic {op, args, ty, i} => {
                let (acc, args) = args.smap_accum_l_result(acc, &f)?;
                Ok((acc, Expr::Intrinsic {op, args, ty, i}))
            },
            Expr::Ident {..} | Expr::Const {..} | Expr::ConstRef {..} |
            Expr::VarRef {..} | Expr::FuncRef {..} | Expr::StructRef {..} => {
                Ok((acc?, self))
            },
        }
    }
}

impl SFold<Expr> for Expr {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &Expr) -> Result<A, E>
    ) -> Result<A, E> {
        match self {
            Expr::AccessIdent {target, ..} => f(acc?, target),
            Expr::AccessIndex {target, index, ..} => f(f(acc?, target)?, index),
            Expr::Assign {lhs, rhs, ..} => f(f(acc?, lhs)?, rhs),
            Expr::BinOp {lhs, rhs, ..} => f(f(acc?, lhs)?, rhs),
            Expr::UnOp {arg, ..} => f(acc?, arg),
            Expr::Swizzle {target, ..} => f(acc?, target),
            Expr::Cast {args, ..} => args.sfold_result(acc, f),
            Expr::IfExpr {cond, thn, els, ..} => f(f(f(acc?, cond)?, thn)?, els),
            Expr::Call {args, ..} => args.sfold_result(acc, f),
            Expr::MethodCall {target, args, ..} => args.sfold_result(f(acc?, target), f),
            Expr::Intrinsic {args, ..} => args.sfold_result(acc, f),
            Expr::Ident {..} | Expr::Const {..} | Expr::ConstRef {..} |
            Expr::VarRef {..} | Expr::FuncRef {..} | Expr::StructRef {..} => acc
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CondBranch {
    pub cond: Expr,
    pub body: Stmt,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExternalVar {
    pub name: String,
    pub ty: Type,
    pub binding_set: Option<u32>,
    pub binding_index: Option<u32>,
    pub idx: Option<usize>,
    pub i: Info,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StructMember {
    pub name: String,
    pub ty: Type,
    pub builtin: Option<BuiltinVar>,
    pub cond: Option<Expr>,
    pub location: Option<u32>,
    pub i: Info,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StructDesc {
    pub name: String,
    pub members: Vec<StructMember>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub idx: Option<usize>,
    pub i: Info,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FunDecl {
    pub name: String,
    pub idx: Option<usize>,
    pub params: Vec<Param>,
    pub ret: Type,
    pub entry: Option<ShaderStage>,
    pub depth_write: Option<DepthWriteMode>,
    pub early_fragment_tests: Option<bool>,
    pub body: Vec<Stmt>,
    pub i: Info,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Branch {branches: Vec<CondBranch>, els: Option<Box<Stmt>>, is_const: bool, i: Info},
    Conditional {cond: Expr, body: Box<Stmt>, i: Info},
    DeclareAlias {name: String, idx: Option<usize>, target: Expr, i: Info},
    DeclareConst {name: String, idx: Option<usize>, ty: Type, init: Expr, i: Info},
    DeclareExternal {vars: Vec<ExternalVar>, i: Info},
    DeclareFunction {v: FunDecl},
    DeclareOption {name: String, idx: Option<usize>, ty: Type, default: Option<Expr>, i: Info},
    DeclareStruct {idx: Option<usize>, desc: StructDesc, i: Info},
    DeclareVariable {name: String, idx: Option<usize>, ty: Type, init: Option<Expr>, i: Info},
    Discard {i: Info},
    Expr {e: Expr, i: Info},
    For {
        var: String, var_idx: Option<usize>, from: Expr, to: Expr,
        step: Option<Expr>, unroll: bool, body: Vec<Stmt>, i: Info
    },
    ForEach {
        var: String, var_idx: Option<usize>, target: Expr, unroll: bool,
        body: Vec<Stmt>, i: Info
    },
    Import {path: String, module_idx: Option<usize>, i: Info},
    Multi {stmts: Vec<Stmt>, i: Info},
    NoOp {i: Info},
    Return {value: Option<Expr>, i: Info},
    Scoped {body: Box<Stmt>, i: Info},
    While {cond: Expr, unroll: bool, body: Vec<Stmt>, i: Info},
}

impl Default for Stmt {
    fn default() -> Stmt {
        Stmt::NoOp {i: Info::default()}
    }
}

impl InfoNode for Stmt {
    fn get_info(&self) -> Info {
        match self {
            Stmt::Branch {i, ..} => i.clone(),
            Stmt::Conditional {i, ..} => i.clone(),
            Stmt::DeclareAlias {i, ..} => i.clone(),
            Stmt::DeclareConst {i, ..} => i.clone(),
            Stmt::DeclareExternal {i, ..} => i.clone(),
            Stmt::DeclareFunction {v} => v.i.clone(),
            Stmt::DeclareOption {i, ..} => i.clone(),
            Stmt::DeclareStruct {i, ..} => i.clone(),
            Stmt::DeclareVariable {i, ..} => i.clone(),
            Stmt::Discard {i} => i.clone(),
            Stmt::Expr {i, ..} => i.clone(),
            Stmt::For {i, ..} => i.clone(),
            Stmt::ForEach {i, ..} => i.clone(),
            Stmt::Import {i, ..} => i.clone(),
            Stmt::Multi {i, ..} => i.clone(),
            Stmt::NoOp {i} => i.clone(),
            Stmt::Return {i, ..} => i.clone(),
            Stmt::Scoped {i, ..} => i.clone(),
            Stmt::While {i, ..} => i.clone(),
        }
    }
}

impl SMapAccum<Expr> for Stmt {
    fn smap_accum_l_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, Expr) -> Result<(A, Expr), E>
    ) -> Result<(A, Stmt), E> {
        match self {
            Stmt::Branch {branches, els, is_const, i} => {
                let (acc, branches) = branches.smap_accum_l_result(acc, |acc, b: CondBranch| {
                    let CondBranch {cond, body} = b;
                    let (acc, cond) = f(acc, cond)?;
                    Ok((acc, CondBranch {cond, body}))
                })?;
                Ok((acc, Stmt::Branch {branches, els, is_const, i}))
            },
            Stmt::Conditional {cond, body, i} => {
                let (acc, cond) = f(acc?, cond)?;
                Ok((acc, Stmt::Conditional {cond, body, i}))
            },
            Stmt::DeclareAlias {name, idx, target, i} => {
                let (acc, target) = f(acc?, target)?;
                Ok((acc, Stmt::DeclareAlias {name, idx, target, i}))
            },
            Stmt::DeclareConst {name, idx, ty, init, i} => {
                let (acc, init) = f(acc?, init)?;
                Ok((acc, Stmt::DeclareConst {name, idx, ty, init, i}))
            },
            Stmt::DeclareOption {name, idx, ty, default, i} => {
                let (acc, default) = default.smap_accum_l_result(acc, &f)?;
                Ok((acc, Stmt::DeclareOption {name, idx, ty, default, i}))
            },
            Stmt::DeclareVariable {name, idx, ty, init, i} => {
                let (acc, init) = init.smap_accum_l_result(acc, &f)?;
                Ok((acc, Stmt::DeclareVariable {name, idx, ty, init, i}))
            },
            Stmt::Expr {e, i} => {
                let (acc, e) = f(acc?, e)?;
                Ok((acc, Stmt::Expr {e, i}))
            },
            Stmt::For {var, var_idx, from, to, step, unroll, body, i} => {
                let (acc, from) = f(acc?, from)?;
                let (acc, to) = f(acc, to)?;
                let (acc, step) = step.smap_accum_l_result(Ok(acc), &f)?;
                Ok((acc, Stmt::For {var, var_idx, from, to, step, unroll, body, i}))
            },
            Stmt::ForEach {var, var_idx, target, unroll, body, i} => {
                let (acc, target) = f(acc?, target)?;
                Ok((acc, Stmt::ForEach {var, var_idx, target, unroll, body, i}))
            },
            Stmt::Return {value, i} => {
                let (acc, value) = value.smap_accum_l_result(acc, &f)?;
                Ok((acc, Stmt::Return {value, i}))
            },
            Stmt::While {cond, unroll, body, i} => {
                let (acc, cond) = f(acc?, cond)?;
                Ok((acc, Stmt::While {cond, unroll, body, i}))
            },
            Stmt::DeclareExternal {..} | Stmt::DeclareFunction {..} |
            Stmt::DeclareStruct {..} | Stmt::Discard {..} | Stmt::Import {..} |
            Stmt::Multi {..} | Stmt::NoOp {..} | Stmt::Scoped {..} => {
                Ok((acc?, self))
            },
        }
    }
}

impl SFold<Expr> for Stmt {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &Expr) -> Result<A, E>
    ) -> Result<A, E> {
        match self {
            Stmt::Branch {branches, ..} => {
                branches.iter().fold(acc, |acc, b| f(acc?, &b.cond))
            },
            Stmt::Conditional {cond, ..} => f(acc?, cond),
            Stmt::DeclareAlias {target, ..} => f(acc?, target),
            Stmt::DeclareConst {init, ..} => f(acc?, init),
            Stmt::DeclareOption {default, ..} => default.sfold_result(acc, f),
            Stmt::DeclareVariable {init, ..} => init.sfold_result(acc, f),
            Stmt::Expr {e, ..} => f(acc?, e),
            Stmt::For {from, to, step, ..} => step.sfold_result(f(f(acc?, from)?, to), f),
            Stmt::ForEach {target, ..} => f(acc?, target),
            Stmt::Return {value, ..} => value.sfold_result(acc, f),
            Stmt::While {cond, ..} => f(acc?, cond),
            Stmt::DeclareExternal {..} | Stmt::DeclareFunction {..} |
            Stmt::DeclareStruct {..} | Stmt::Discard {..} | Stmt::Import {..} |
            Stmt::Multi {..} | Stmt::NoOp {..} | Stmt::Scoped {..} => acc
        }
    }
}

impl SMapAccum<Stmt> for Stmt {
    fn smap_accum_l_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, Stmt) -> Result<(A, Stmt), E>
    ) -> Result<(A, Stmt), E> {
        match self {
            Stmt::Branch {branches, els, is_const, i} => {
                let (acc, branches) = branches.smap_accum_l_result(acc, |acc, b: CondBranch| {
                    let CondBranch {cond, body} = b;
                    let (acc, body) = f(acc, body)?;
                    Ok((acc, CondBranch {cond, body}))
                })?;
                let (acc, els) = SMapAccum::<Stmt>::smap_accum_l_result(
                    els, Ok(acc), &f
                )?;
                Ok((acc, Stmt::Branch {branches, els, is_const, i}))
            },
            Stmt::Conditional {cond, body, i} => {
                let (acc, body) = f(acc?, *body)?;
                Ok((acc, Stmt::Conditional {cond, body: Box::new(body), i}))
            },
            Stmt::DeclareFunction {v} => {
                let FunDecl {
                    name, idx, params, ret, entry, depth_write,
                    early_fragment_tests, body, i
                } = v;
                let (acc, body) = body.smap_accum_l_result(acc, &f)?;
                Ok((acc, Stmt::DeclareFunction {v: FunDecl {
                    name, idx, params, ret, entry, depth_write,
                    early_fragment_tests, body, i
                }}))
            },
            Stmt::For {var, var_idx, from, to, step, unroll, body, i} => {
                let (acc, body) = body.smap_accum_l_result(acc, &f)?;
                Ok((acc, Stmt::For {var, var_idx, from, to, step, unroll, body, i}))
            },
            Stmt::ForEach {var, var_idx, target, unroll, body, i} => {
                let (acc, body) = body.smap_accum_l_result(acc, &f)?;
                Ok((acc, Stmt::ForEach {var, var_idx, target, unroll, body, i}))
            },
            Stmt::Multi {stmts, i} => {
                let (acc, stmts) = stmts.smap_accum_l_result(acc, &f)?;
                Ok((acc, Stmt::Multi {stmts, i}))
            },
            Stmt::Scoped {body, i} => {
                let (acc, body) = f(acc?, *body)?;
                Ok((acc, Stmt::Scoped {body: Box::new(body), i}))
            },
            Stmt::While {cond, unroll, body, i} => {
                let (acc, body) = body.smap_accum_l_result(acc, &f)?;
                Ok((acc, Stmt::While {cond, unroll, body, i}))
            },
            Stmt::DeclareAlias {..} | Stmt::DeclareConst {..} |
            Stmt::DeclareExternal {..} | Stmt::DeclareOption {..} |
            Stmt::DeclareStruct {..} | Stmt::DeclareVariable {..} |
            Stmt::Discard {..} | Stmt::Expr {..} | Stmt::Import {..} |
            Stmt::NoOp {..} | Stmt::Return {..} => {
                Ok((acc?, self))
            },
        }
    }
}

impl SFold<Stmt> for Stmt {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &Stmt) -> Result<A, E>
    ) -> Result<A, E> {
        match self {
            Stmt::Branch {branches, els, ..} => {
                let acc = branches.iter().fold(acc, |acc, b| f(acc?, &b.body));
                SFold::<Stmt>::sfold_result(els, acc, f)
            },
            Stmt::Conditional {body, ..} => f(acc?, body),
            Stmt::DeclareFunction {v} => v.body.sfold_result(acc, f),
            Stmt::For {body, ..} => body.sfold_result(acc, f),
            Stmt::ForEach {body, ..} => body.sfold_result(acc, f),
            Stmt::Multi {stmts, ..} => stmts.sfold_result(acc, f),
            Stmt::Scoped {body, ..} => f(acc?, body),
            Stmt::While {body, ..} => body.sfold_result(acc, f),
            Stmt::DeclareAlias {..} | Stmt::DeclareConst {..} |
            Stmt::DeclareExternal {..} | Stmt::DeclareOption {..} |
            Stmt::DeclareStruct {..} | Stmt::DeclareVariable {..} |
            Stmt::Discard {..} | Stmt::Expr {..} | Stmt::Import {..} |
            Stmt::NoOp {..} | Stmt::Return {..} => acc
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Module {
    pub stmts: Vec<Stmt>,
}

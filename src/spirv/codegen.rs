use super::cache::{SpirvCache, SpvType};
use super::ops::{glsl_std_450, storage_class, Op};
use super::prescan::ModuleInfo;
use super::section::Section;
use crate::ast::ast::*;
use crate::internal_error;
use crate::utils::err::*;
use crate::utils::info::{Info, InfoNode};

use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct VarSlot {
    pub ptr: u32,
    pub storage: u32,
}

// The input and output globals backing an entry point's parameter and return
// structs, aligned with the member order of those structs.
pub struct EntryIo {
    pub input_struct: Option<usize>,
    pub output_struct: Option<usize>,
    pub inputs: Vec<u32>,
    pub outputs: Vec<u32>,
    pub interface: Vec<u32>,
}

pub struct FuncGen<'a, 'b> {
    cache: &'b mut SpirvCache<'a>,
    info: &'b ModuleInfo,
    func_ids: &'b BTreeMap<usize, u32>,
    glsl_id: Option<u32>,
    entry: Option<&'b EntryIo>,
    vars: BTreeMap<usize, VarSlot>,
    body: Section,
    terminated: bool,
}

pub fn emit_function<'a, 'b>(
    cache: &'b mut SpirvCache<'a>,
    info: &'b ModuleInfo,
    func_ids: &'b BTreeMap<usize, u32>,
    glsl_id: Option<u32>,
    globals: &BTreeMap<usize, VarSlot>,
    f: &FunDecl,
    entry: Option<&'b EntryIo>
) -> CompileResult<Section> {
    let idx = match f.idx {
        Some(idx) => idx,
        None => return internal_error!(f.i, "Function {0} has no resolved \
            index", f.name)
    };
    let fid = match func_ids.get(&idx) {
        Some(fid) => *fid,
        None => return internal_error!(f.i, "Function {0} was not assigned \
            an ID", f.name)
    };
    let mut gen = FuncGen {
        cache,
        info,
        func_ids,
        glsl_id,
        entry,
        vars: globals.clone(),
        body: Section::new(),
        terminated: false,
    };
    if entry.is_some() {
        gen.emit_entry(f, fid, idx)?;
    } else {
        gen.emit_plain(f, fid, idx)?;
    }
    Ok(gen.body)
}

fn const_index(e: &Expr) -> Option<u32> {
    match e {
        Expr::Const {v: ConstValue::Int {v}, ..} if *v >= 0 => Some(*v as u32),
        Expr::Const {v: ConstValue::UInt {v}, ..} => Some(*v),
        _ => None
    }
}

fn scalar_arith_op(op: &BinOp, elem: Primitive) -> Option<Op> {
    match (op, elem) {
        (BinOp::Add, Primitive::Float) => Some(Op::FAdd),
        (BinOp::Add, Primitive::Int | Primitive::UInt) => Some(Op::IAdd),
        (BinOp::Sub, Primitive::Float) => Some(Op::FSub),
        (BinOp::Sub, Primitive::Int | Primitive::UInt) => Some(Op::ISub),
        (BinOp::Mul, Primitive::Float) => Some(Op::FMul),
        (BinOp::Mul, Primitive::Int | Primitive::UInt) => Some(Op::IMul),
        (BinOp::Div, Primitive::Float) => Some(Op::FDiv),
        (BinOp::Div, Primitive::Int) => Some(Op::SDiv),
        (BinOp::Div, Primitive::UInt) => Some(Op::UDiv),
        _ => None
    }
}

fn scalar_cmp_op(op: &BinOp, elem: Primitive) -> Option<Op> {
    match (op, elem) {
        (BinOp::Eq, Primitive::Bool) => Some(Op::LogicalEqual),
        (BinOp::Neq, Primitive::Bool) => Some(Op::LogicalNotEqual),
        (BinOp::Eq, Primitive::Float) => Some(Op::FOrdEqual),
        (BinOp::Neq, Primitive::Float) => Some(Op::FOrdNotEqual),
        (BinOp::Eq, Primitive::Int | Primitive::UInt) => Some(Op::IEqual),
        (BinOp::Neq, Primitive::Int | Primitive::UInt) => Some(Op::INotEqual),
        (BinOp::Lt, Primitive::Float) => Some(Op::FOrdLessThan),
        (BinOp::Lt, Primitive::Int) => Some(Op::SLessThan),
        (BinOp::Lt, Primitive::UInt) => Some(Op::ULessThan),
        (BinOp::Leq, Primitive::Float) => Some(Op::FOrdLessThanEqual),
        (BinOp::Leq, Primitive::Int) => Some(Op::SLessThanEqual),
        (BinOp::Leq, Primitive::UInt) => Some(Op::ULessThanEqual),
        (BinOp::Gt, Primitive::Float) => Some(Op::FOrdGreaterThan),
        (BinOp::Gt, Primitive::Int) => Some(Op::SGreaterThan),
        (BinOp::Gt, Primitive::UInt) => Some(Op::UGreaterThan),
        (BinOp::Geq, Primitive::Float) => Some(Op::FOrdGreaterThanEqual),
        (BinOp::Geq, Primitive::Int) => Some(Op::SGreaterThanEqual),
        (BinOp::Geq, Primitive::UInt) => Some(Op::UGreaterThanEqual),
        _ => None
    }
}

impl<'a, 'b> FuncGen<'a, 'b> {
    fn alloc(&mut self) -> u32 {
        self.cache.alloc_id()
    }

    fn spv(&mut self, ty: &Type) -> CompileResult<SpvType> {
        self.cache.from_ast_type(ty)
    }

    fn type_id_of(&mut self, ty: &Type) -> CompileResult<u32> {
        self.cache.ast_type_id(ty)
    }

    fn bool_type_id(&mut self) -> CompileResult<u32> {
        self.cache.type_id(&SpvType::Bool)
    }

    // Instructions after a block terminator open a fresh, unreachable block.
    fn ensure_block(&mut self) {
        if self.terminated {
            let label = self.alloc();
            self.body.append(Op::Label, &[label]);
            self.terminated = false;
        }
    }

    fn declare_locals(&mut self, idx: usize) -> CompileResult<()> {
        let locals = self.info.locals.get(&idx).cloned().unwrap_or_default();
        for l in locals {
            let spv = self.spv(&l.ty)?;
            let ptr_ty = self.cache.pointer_id(storage_class::FUNCTION, &spv)?;
            let vid = self.alloc();
            self.body.append(Op::Variable, &[
                ptr_ty, vid, storage_class::FUNCTION
            ]);
            self.cache.debug.append_with_string(Op::Name, &[vid], &l.name, &[]);
            self.vars.insert(l.idx, VarSlot {
                ptr: vid,
                storage: storage_class::FUNCTION,
            });
        }
        Ok(())
    }

    fn emit_plain(&mut self, f: &FunDecl, fid: u32, idx: usize) -> CompileResult<()> {
        let ret_spv = self.spv(&f.ret)?;
        let param_spvs = f.params.iter()
            .map(|p| self.cache.from_ast_type(&p.ty))
            .collect::<CompileResult<Vec<SpvType>>>()?;
        let fn_ty = self.cache.type_id(&SpvType::Function {
            ret: Box::new(ret_spv.clone()),
            params: param_spvs
        })?;
        let ret_id = self.cache.type_id(&ret_spv)?;
        self.body.append(Op::Function, &[ret_id, fid, 0, fn_ty]);
        let mut param_values = vec![];
        for p in &f.params {
            let tid = self.type_id_of(&p.ty)?;
            let pid = self.alloc();
            self.body.append(Op::FunctionParameter, &[tid, pid]);
            param_values.push(pid);
        }
        let label = self.alloc();
        self.body.append(Op::Label, &[label]);
        // All OpVariable instructions open the first block; parameters are
        // copied into locals so every variable reference is a pointer.
        let mut param_slots = vec![];
        for p in &f.params {
            let pidx = match p.idx {
                Some(pidx) => pidx,
                None => return internal_error!(p.i, "Parameter {0} has no \
                    resolved index", p.name)
            };
            let spv = self.spv(&p.ty)?;
            let ptr_ty = self.cache.pointer_id(storage_class::FUNCTION, &spv)?;
            let vid = self.alloc();
            self.body.append(Op::Variable, &[
                ptr_ty, vid, storage_class::FUNCTION
            ]);
            self.cache.debug.append_with_string(Op::Name, &[vid], &p.name, &[]);
            self.vars.insert(pidx, VarSlot {
                ptr: vid,
                storage: storage_class::FUNCTION,
            });
            param_slots.push(vid);
        }
        self.declare_locals(idx)?;
        for (vid, pid) in param_slots.iter().zip(param_values) {
            self.body.append(Op::Store, &[*vid, pid]);
        }
        self.emit_stmts(&f.body)?;
        if !self.terminated {
            if f.ret == Type::Void {
                self.body.append(Op::Return, &[]);
            } else {
                self.body.append(Op::Unreachable, &[]);
            }
        }
        self.body.append(Op::FunctionEnd, &[]);
        Ok(())
    }

    fn emit_entry(&mut self, f: &FunDecl, fid: u32, idx: usize) -> CompileResult<()> {
        let void_id = self.cache.type_id(&SpvType::Void)?;
        let fn_ty = self.cache.type_id(&SpvType::Function {
            ret: Box::new(SpvType::Void),
            params: vec![]
        })?;
        self.body.append(Op::Function, &[void_id, fid, 0, fn_ty]);
        let label = self.alloc();
        self.body.append(Op::Label, &[label]);
        let param_slot = match f.params.first() {
            Some(p) => {
                let pidx = match p.idx {
                    Some(pidx) => pidx,
                    None => return internal_error!(p.i, "Parameter {0} has \
                        no resolved index", p.name)
                };
                let spv = self.spv(&p.ty)?;
                let ptr_ty = self.cache.pointer_id(storage_class::FUNCTION, &spv)?;
                let vid = self.alloc();
                self.body.append(Op::Variable, &[
                    ptr_ty, vid, storage_class::FUNCTION
                ]);
                self.cache.debug.append_with_string(Op::Name, &[vid], &p.name, &[]);
                self.vars.insert(pidx, VarSlot {
                    ptr: vid,
                    storage: storage_class::FUNCTION,
                });
                Some(vid)
            },
            None => None
        };
        self.declare_locals(idx)?;
        // The input struct local is filled member-by-member from the Input
        // globals before the body runs.
        let io = self.entry.unwrap();
        if let (Some(local), Some(sidx)) = (param_slot, io.input_struct) {
            let members = self.info.structs[sidx].members.iter()
                .map(|m| m.ty.clone())
                .collect::<Vec<Type>>();
            for (m, mty) in members.iter().enumerate() {
                let mtid = self.type_id_of(mty)?;
                let tmp = self.alloc();
                self.body.append(Op::Load, &[mtid, tmp, io.inputs[m]]);
                let index = self.cache.uint_const(m as u32)?;
                let mspv = self.spv(mty)?;
                let ptr_ty = self.cache.pointer_id(storage_class::FUNCTION, &mspv)?;
                let chain = self.alloc();
                self.body.append(Op::AccessChain, &[ptr_ty, chain, local, index]);
                self.body.append(Op::Store, &[chain, tmp]);
            }
        }
        self.emit_stmts(&f.body)?;
        if !self.terminated {
            self.body.append(Op::Return, &[]);
        }
        self.body.append(Op::FunctionEnd, &[]);
        Ok(())
    }

    fn emit_stmts(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        for s in stmts {
            self.emit_stmt(s)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, s: &Stmt) -> CompileResult<()> {
        match s {
            Stmt::DeclareVariable {idx, init, i, name, ..} => {
                self.ensure_block();
                let idx = match idx {
                    Some(idx) => *idx,
                    None => return internal_error!(i, "Variable {name} has \
                        no resolved index")
                };
                if let Some(e) = init {
                    let value = self.emit_expr(e)?;
                    let ptr = match self.vars.get(&idx) {
                        Some(slot) => slot.ptr,
                        None => return internal_error!(i, "Variable {name} \
                            has no storage slot")
                    };
                    self.body.append(Op::Store, &[ptr, value]);
                }
                Ok(())
            },
            Stmt::Expr {e, ..} => {
                self.ensure_block();
                self.emit_expr(e)?;
                Ok(())
            },
            Stmt::Branch {branches, els, i, ..} => {
                if branches.len() != 1 {
                    return internal_error!(i, "Unsplit branch chain reached \
                        code generation");
                }
                self.ensure_block();
                let cond = self.emit_expr(&branches[0].cond)?;
                let merge = self.alloc();
                let then_label = self.alloc();
                let else_label = if els.is_some() { self.alloc() } else { merge };
                self.body.append(Op::SelectionMerge, &[merge, 0]);
                self.body.append(Op::BranchConditional, &[
                    cond, then_label, else_label
                ]);
                self.body.append(Op::Label, &[then_label]);
                self.terminated = false;
                self.emit_stmt(&branches[0].body)?;
                if !self.terminated {
                    self.body.append(Op::Branch, &[merge]);
                }
                if let Some(els) = els {
                    self.body.append(Op::Label, &[else_label]);
                    self.terminated = false;
                    self.emit_stmt(els)?;
                    if !self.terminated {
                        self.body.append(Op::Branch, &[merge]);
                    }
                }
                self.body.append(Op::Label, &[merge]);
                self.terminated = false;
                Ok(())
            },
            Stmt::While {cond, body, ..} => {
                self.ensure_block();
                let header = self.alloc();
                let cond_label = self.alloc();
                let body_label = self.alloc();
                let continue_label = self.alloc();
                let merge = self.alloc();
                self.body.append(Op::Branch, &[header]);
                self.body.append(Op::Label, &[header]);
                self.body.append(Op::LoopMerge, &[merge, continue_label, 0]);
                self.body.append(Op::Branch, &[cond_label]);
                self.body.append(Op::Label, &[cond_label]);
                let cond = self.emit_expr(cond)?;
                self.body.append(Op::BranchConditional, &[cond, body_label, merge]);
                self.body.append(Op::Label, &[body_label]);
                self.terminated = false;
                self.emit_stmts(body)?;
                if !self.terminated {
                    self.body.append(Op::Branch, &[continue_label]);
                }
                self.body.append(Op::Label, &[continue_label]);
                self.body.append(Op::Branch, &[header]);
                self.body.append(Op::Label, &[merge]);
                self.terminated = false;
                Ok(())
            },
            Stmt::Discard {..} => {
                self.ensure_block();
                self.body.append(Op::Kill, &[]);
                self.terminated = true;
                Ok(())
            },
            Stmt::Return {value, ..} => {
                self.ensure_block();
                self.emit_return(value)
            },
            Stmt::Multi {stmts, ..} => self.emit_stmts(stmts),
            Stmt::Scoped {body, ..} => self.emit_stmt(body),
            Stmt::NoOp {..} => Ok(()),
            s => {
                let i = s.get_info();
                internal_error!(i, "Statement kind cannot be lowered to \
                    instructions")
            }
        }
    }

    fn emit_return(&mut self, value: &Option<Expr>) -> CompileResult<()> {
        match (self.entry, value) {
            (Some(io), Some(e)) => {
                let composite = self.emit_expr(e)?;
                if let Some(sidx) = io.output_struct {
                    let members = self.info.structs[sidx].members.iter()
                        .map(|m| m.ty.clone())
                        .collect::<Vec<Type>>();
                    for (m, mty) in members.iter().enumerate() {
                        let mtid = self.type_id_of(mty)?;
                        let extracted = self.alloc();
                        self.body.append(Op::CompositeExtract, &[
                            mtid, extracted, composite, m as u32
                        ]);
                        self.body.append(Op::Store, &[io.outputs[m], extracted]);
                    }
                }
                self.body.append(Op::Return, &[]);
            },
            (Some(_), None) | (None, None) => {
                self.body.append(Op::Return, &[]);
            },
            (None, Some(e)) => {
                let value = self.emit_expr(e)?;
                self.body.append(Op::ReturnValue, &[value]);
            },
        }
        self.terminated = true;
        Ok(())
    }

    // Produces a pointer to the location an expression designates, when the
    // expression is rooted in a variable.
    fn emit_pointer(&mut self, e: &Expr) -> CompileResult<Option<(u32, u32)>> {
        match e {
            Expr::VarRef {idx, i, ..} => {
                match self.vars.get(idx) {
                    Some(slot) => Ok(Some((slot.ptr, slot.storage))),
                    None => internal_error!(i, "Variable {idx} has no \
                        storage slot")
                }
            },
            Expr::AccessIndex {target, index, ty, ..} => {
                match self.emit_pointer(target)? {
                    Some((base, storage)) => {
                        let index_id = self.emit_expr(index)?;
                        let inner = self.spv(ty)?;
                        let ptr_ty = self.cache.pointer_id(storage, &inner)?;
                        let id = self.alloc();
                        self.body.append(Op::AccessChain, &[
                            ptr_ty, id, base, index_id
                        ]);
                        Ok(Some((id, storage)))
                    },
                    None => Ok(None)
                }
            },
            Expr::Swizzle {target, comps, ty, ..} if comps.len() == 1 => {
                match self.emit_pointer(target)? {
                    Some((base, storage)) => {
                        let index = self.cache.uint_const(comps[0].index() as u32)?;
                        let inner = self.spv(ty)?;
                        let ptr_ty = self.cache.pointer_id(storage, &inner)?;
                        let id = self.alloc();
                        self.body.append(Op::AccessChain, &[ptr_ty, id, base, index]);
                        Ok(Some((id, storage)))
                    },
                    None => Ok(None)
                }
            },
            _ => Ok(None)
        }
    }

    fn emit_store(&mut self, lhs: &Expr, value: u32) -> CompileResult<()> {
        if let Expr::Swizzle {target, comps, i, ..} = lhs {
            if comps.len() > 1 {
                // A masked vector write: load the current value, shuffle the
                // new components in, store the merged vector back.
                let target_ty = target.get_type().clone();
                let dim = match &target_ty {
                    Type::Vector {dim, ..} => *dim,
                    ty => return internal_error!(i, "Cannot store through a \
                        swizzle of type {ty:?}")
                };
                let (ptr, _) = match self.emit_pointer(target)? {
                    Some(p) => p,
                    None => return internal_error!(i, "Assignment target is \
                        not addressable")
                };
                let vec_tid = self.type_id_of(&target_ty)?;
                let current = self.alloc();
                self.body.append(Op::Load, &[vec_tid, current, ptr]);
                let mut operands = vec![vec_tid, 0, current, value];
                let merged = self.alloc();
                operands[1] = merged;
                for lane in 0..dim {
                    let replacement = comps.iter()
                        .position(|c| c.index() == lane)
                        .map(|p| (dim + p) as u32);
                    operands.push(replacement.unwrap_or(lane as u32));
                }
                self.body.append(Op::VectorShuffle, &operands);
                self.body.append(Op::Store, &[ptr, merged]);
                return Ok(());
            }
        }
        match self.emit_pointer(lhs)? {
            Some((ptr, _)) => {
                self.body.append(Op::Store, &[ptr, value]);
                Ok(())
            },
            None => {
                let i = lhs.get_info();
                internal_error!(i, "Assignment target is not addressable")
            }
        }
    }

    fn splat(&mut self, scalar: u32, dim: usize, elem: Primitive) -> CompileResult<u32> {
        let vec_ty = Type::Vector {dim, elem};
        let tid = self.type_id_of(&vec_ty)?;
        let id = self.alloc();
        let mut operands = vec![tid, id];
        operands.extend(std::iter::repeat(scalar).take(dim));
        self.body.append(Op::CompositeConstruct, &operands);
        Ok(id)
    }

    fn matrix_componentwise(
        &mut self,
        opcode: Op,
        lhs: u32,
        rhs: u32,
        cols: usize,
        rows: usize,
        elem: Primitive
    ) -> CompileResult<u32> {
        let col_ty = Type::Vector {dim: rows, elem};
        let col_tid = self.type_id_of(&col_ty)?;
        let mat_tid = self.type_id_of(&Type::Matrix {cols, rows, elem})?;
        let mut col_results = vec![];
        for c in 0..cols {
            let l = self.alloc();
            self.body.append(Op::CompositeExtract, &[col_tid, l, lhs, c as u32]);
            let r = self.alloc();
            self.body.append(Op::CompositeExtract, &[col_tid, r, rhs, c as u32]);
            let res = self.alloc();
            self.body.append(opcode, &[col_tid, res, l, r]);
            col_results.push(res);
        }
        let id = self.alloc();
        let mut operands = vec![mat_tid, id];
        operands.extend(col_results);
        self.body.append(Op::CompositeConstruct, &operands);
        Ok(id)
    }

    fn emit_equality(
        &mut self,
        negate: bool,
        ty: &Type,
        lhs: u32,
        rhs: u32,
        i: &Info
    ) -> CompileResult<u32> {
        let bool_id = self.bool_type_id()?;
        match ty {
            Type::Primitive {ty: p} => {
                let op = match scalar_cmp_op(&BinOp::Eq, *p) {
                    Some(op) => op,
                    None => return internal_error!(i, "No equality \
                        instruction for {p:?}")
                };
                let id = self.alloc();
                self.body.append(op, &[bool_id, id, lhs, rhs]);
                self.finish_equality(negate, id)
            },
            Type::Vector {dim, elem} => {
                let op = match scalar_cmp_op(&BinOp::Eq, *elem) {
                    Some(op) => op,
                    None => return internal_error!(i, "No equality \
                        instruction for {elem:?}")
                };
                let bvec = self.cache.type_id(&SpvType::Vector {
                    elem: Primitive::Bool, dim: *dim as u32
                })?;
                let compared = self.alloc();
                self.body.append(op, &[bvec, compared, lhs, rhs]);
                let id = self.alloc();
                self.body.append(Op::All, &[bool_id, id, compared]);
                self.finish_equality(negate, id)
            },
            Type::Matrix {cols, rows, elem} => {
                let col_ty = Type::Vector {dim: *rows, elem: *elem};
                let col_tid = self.type_id_of(&col_ty)?;
                let mut acc = None;
                for c in 0..*cols {
                    let l = self.alloc();
                    self.body.append(Op::CompositeExtract, &[
                        col_tid, l, lhs, c as u32
                    ]);
                    let r = self.alloc();
                    self.body.append(Op::CompositeExtract, &[
                        col_tid, r, rhs, c as u32
                    ]);
                    let eq = self.emit_equality(false, &col_ty, l, r, i)?;
                    acc = match acc {
                        Some(prev) => {
                            let id = self.alloc();
                            self.body.append(Op::LogicalAnd, &[
                                bool_id, id, prev, eq
                            ]);
                            Some(id)
                        },
                        None => Some(eq)
                    };
                }
                match acc {
                    Some(id) => self.finish_equality(negate, id),
                    None => internal_error!(i, "Matrix equality over zero \
                        columns")
                }
            },
            ty => internal_error!(i, "No equality lowering for type {ty:?}")
        }
    }

    fn finish_equality(&mut self, negate: bool, id: u32) -> CompileResult<u32> {
        if negate {
            let bool_id = self.bool_type_id()?;
            let out = self.alloc();
            self.body.append(Op::LogicalNot, &[bool_id, out, id]);
            Ok(out)
        } else {
            Ok(id)
        }
    }

    fn emit_mul(
        &mut self,
        lty: &Type,
        rty: &Type,
        lhs: u32,
        rhs: u32,
        res_ty: &Type,
        i: &Info
    ) -> CompileResult<u32> {
        let res_tid = self.type_id_of(res_ty)?;
        let id = self.alloc();
        match (lty, rty) {
            (Type::Matrix {..}, Type::Matrix {..}) => {
                self.body.append(Op::MatrixTimesMatrix, &[res_tid, id, lhs, rhs]);
                Ok(id)
            },
            (Type::Matrix {..}, Type::Vector {..}) => {
                self.body.append(Op::MatrixTimesVector, &[res_tid, id, lhs, rhs]);
                Ok(id)
            },
            (Type::Matrix {..}, Type::Primitive {..}) => {
                self.body.append(Op::MatrixTimesScalar, &[res_tid, id, lhs, rhs]);
                Ok(id)
            },
            (Type::Primitive {..}, Type::Matrix {..}) => {
                self.body.append(Op::MatrixTimesScalar, &[res_tid, id, rhs, lhs]);
                Ok(id)
            },
            (Type::Vector {elem: Primitive::Float, ..}, Type::Primitive {..}) => {
                self.body.append(Op::VectorTimesScalar, &[res_tid, id, lhs, rhs]);
                Ok(id)
            },
            (Type::Primitive {..}, Type::Vector {elem: Primitive::Float, ..}) => {
                self.body.append(Op::VectorTimesScalar, &[res_tid, id, rhs, lhs]);
                Ok(id)
            },
            (Type::Vector {dim, elem}, Type::Primitive {..}) => {
                let splatted = self.splat(rhs, *dim, *elem)?;
                self.body.append(Op::IMul, &[res_tid, id, lhs, splatted]);
                Ok(id)
            },
            (Type::Primitive {..}, Type::Vector {dim, elem}) => {
                let splatted = self.splat(lhs, *dim, *elem)?;
                self.body.append(Op::IMul, &[res_tid, id, splatted, rhs]);
                Ok(id)
            },
            (Type::Vector {elem, ..}, Type::Vector {..}) |
            (Type::Primitive {ty: elem}, Type::Primitive {..}) => {
                match scalar_arith_op(&BinOp::Mul, *elem) {
                    Some(op) => {
                        self.body.append(op, &[res_tid, id, lhs, rhs]);
                        Ok(id)
                    },
                    None => internal_error!(i, "No multiply instruction for \
                        {elem:?}")
                }
            },
            _ => internal_error!(i, "No multiply lowering for {lty:?} and \
                {rty:?}")
        }
    }

    fn emit_div(
        &mut self,
        lty: &Type,
        rty: &Type,
        lhs: u32,
        rhs: u32,
        res_ty: &Type,
        i: &Info
    ) -> CompileResult<u32> {
        match (lty, rty) {
            (Type::Vector {dim, elem}, Type::Primitive {..}) => {
                let splatted = self.splat(rhs, *dim, *elem)?;
                self.emit_div(lty, lty, lhs, splatted, res_ty, i)
            },
            (Type::Primitive {..}, Type::Vector {dim, elem}) => {
                let splatted = self.splat(lhs, *dim, *elem)?;
                self.emit_div(rty, rty, splatted, rhs, res_ty, i)
            },
            (Type::Matrix {..}, Type::Primitive {..}) => {
                let float_id = self.type_id_of(&Type::float())?;
                let one = self.cache.const_id(&ConstValue::Float {v: 1.0})?;
                let inverse = self.alloc();
                self.body.append(Op::FDiv, &[float_id, inverse, one, rhs]);
                let res_tid = self.type_id_of(res_ty)?;
                let id = self.alloc();
                self.body.append(Op::MatrixTimesScalar, &[
                    res_tid, id, lhs, inverse
                ]);
                Ok(id)
            },
            (Type::Matrix {cols, rows, elem}, Type::Matrix {..}) => {
                self.matrix_componentwise(Op::FDiv, lhs, rhs, *cols, *rows, *elem)
            },
            (Type::Vector {elem, ..}, Type::Vector {..}) |
            (Type::Primitive {ty: elem}, Type::Primitive {..}) => {
                match scalar_arith_op(&BinOp::Div, *elem) {
                    Some(op) => {
                        let res_tid = self.type_id_of(res_ty)?;
                        let id = self.alloc();
                        self.body.append(op, &[res_tid, id, lhs, rhs]);
                        Ok(id)
                    },
                    None => internal_error!(i, "No divide instruction for \
                        {elem:?}")
                }
            },
            _ => internal_error!(i, "No divide lowering for {lty:?} and \
                {rty:?}")
        }
    }

    fn emit_binop(
        &mut self,
        op: &BinOp,
        lhs: &Expr,
        rhs: &Expr,
        res_ty: &Type,
        i: &Info
    ) -> CompileResult<u32> {
        let lty = lhs.get_type().clone();
        let rty = rhs.get_type().clone();
        let lid = self.emit_expr(lhs)?;
        let rid = self.emit_expr(rhs)?;
        match op {
            BinOp::And | BinOp::Or => {
                let bool_id = self.bool_type_id()?;
                let opcode = if *op == BinOp::And {
                    Op::LogicalAnd
                } else {
                    Op::LogicalOr
                };
                let id = self.alloc();
                self.body.append(opcode, &[bool_id, id, lid, rid]);
                Ok(id)
            },
            BinOp::Eq => self.emit_equality(false, &lty, lid, rid, i),
            BinOp::Neq => self.emit_equality(true, &lty, lid, rid, i),
            BinOp::Lt | BinOp::Leq | BinOp::Gt | BinOp::Geq => {
                let elem = match lty.elem_primitive() {
                    Some(p) => p,
                    None => return internal_error!(i, "Comparison of \
                        non-scalar type {lty:?}")
                };
                let opcode = match scalar_cmp_op(op, elem) {
                    Some(op) => op,
                    None => return internal_error!(i, "No comparison \
                        instruction for {elem:?}")
                };
                let bool_id = self.bool_type_id()?;
                let id = self.alloc();
                self.body.append(opcode, &[bool_id, id, lid, rid]);
                Ok(id)
            },
            BinOp::Add | BinOp::Sub => {
                if let Type::Matrix {cols, rows, elem} = &lty {
                    let opcode = if *op == BinOp::Add { Op::FAdd } else { Op::FSub };
                    return self.matrix_componentwise(
                        opcode, lid, rid, *cols, *rows, *elem
                    );
                }
                let elem = match lty.elem_primitive() {
                    Some(p) => p,
                    None => return internal_error!(i, "Arithmetic on \
                        non-numeric type {lty:?}")
                };
                let opcode = match scalar_arith_op(op, elem) {
                    Some(op) => op,
                    None => return internal_error!(i, "No arithmetic \
                        instruction for {elem:?}")
                };
                let res_tid = self.type_id_of(res_ty)?;
                let id = self.alloc();
                self.body.append(opcode, &[res_tid, id, lid, rid]);
                Ok(id)
            },
            BinOp::Mul => self.emit_mul(&lty, &rty, lid, rid, res_ty, i),
            BinOp::Div => self.emit_div(&lty, &rty, lid, rid, res_ty, i),
        }
    }

    fn ext_inst(
        &mut self,
        inst: u32,
        res_tid: u32,
        args: &[u32],
        i: &Info
    ) -> CompileResult<u32> {
        let set = match self.glsl_id {
            Some(id) => id,
            None => return internal_error!(i, "Extended instruction used but \
                no instruction set was imported")
        };
        let id = self.alloc();
        let mut operands = vec![res_tid, id, set, inst];
        operands.extend_from_slice(args);
        self.body.append(Op::ExtInst, &operands);
        Ok(id)
    }

    fn emit_intrinsic(
        &mut self,
        op: &IntrinsicOp,
        args: &[Expr],
        res_ty: &Type,
        i: &Info
    ) -> CompileResult<u32> {
        let arg_types = args.iter()
            .map(|a| a.get_type().clone())
            .collect::<Vec<Type>>();
        let arg_ids = args.iter()
            .map(|a| self.emit_expr(a))
            .collect::<CompileResult<Vec<u32>>>()?;
        let res_tid = self.type_id_of(res_ty)?;
        match op {
            IntrinsicOp::DotProduct => {
                let id = self.alloc();
                self.body.append(Op::Dot, &[
                    res_tid, id, arg_ids[0], arg_ids[1]
                ]);
                Ok(id)
            },
            IntrinsicOp::SampleTexture => {
                let id = self.alloc();
                self.body.append(Op::ImageSampleImplicitLod, &[
                    res_tid, id, arg_ids[0], arg_ids[1]
                ]);
                Ok(id)
            },
            IntrinsicOp::CrossProduct => {
                self.ext_inst(glsl_std_450::CROSS, res_tid, &arg_ids, i)
            },
            IntrinsicOp::Exp => {
                self.ext_inst(glsl_std_450::EXP, res_tid, &arg_ids, i)
            },
            IntrinsicOp::Length => {
                self.ext_inst(glsl_std_450::LENGTH, res_tid, &arg_ids, i)
            },
            IntrinsicOp::Normalize => {
                self.ext_inst(glsl_std_450::NORMALIZE, res_tid, &arg_ids, i)
            },
            IntrinsicOp::Pow => {
                self.ext_inst(glsl_std_450::POW, res_tid, &arg_ids, i)
            },
            IntrinsicOp::Reflect => {
                self.ext_inst(glsl_std_450::REFLECT, res_tid, &arg_ids, i)
            },
            IntrinsicOp::Max | IntrinsicOp::Min => {
                let elem = arg_types[0].elem_primitive();
                let inst = match (op, elem) {
                    (IntrinsicOp::Max, Some(Primitive::Float)) => glsl_std_450::F_MAX,
                    (IntrinsicOp::Max, Some(Primitive::Int)) => glsl_std_450::S_MAX,
                    (IntrinsicOp::Max, Some(Primitive::UInt)) => glsl_std_450::U_MAX,
                    (IntrinsicOp::Min, Some(Primitive::Float)) => glsl_std_450::F_MIN,
                    (IntrinsicOp::Min, Some(Primitive::Int)) => glsl_std_450::S_MIN,
                    (IntrinsicOp::Min, Some(Primitive::UInt)) => glsl_std_450::U_MIN,
                    _ => return internal_error!(i, "No {op:?} instruction \
                        for {0:?}", arg_types[0])
                };
                self.ext_inst(inst, res_tid, &arg_ids, i)
            },
        }
    }

    fn emit_cast(
        &mut self,
        target_ty: &Type,
        args: &[Expr],
        i: &Info
    ) -> CompileResult<u32> {
        let res_tid = self.type_id_of(target_ty)?;
        if args.len() == 1 {
            let src_ty = args[0].get_type().clone();
            let src_elem = src_ty.elem_primitive();
            let dst_elem = target_ty.elem_primitive();
            let value = self.emit_expr(&args[0])?;
            let opcode = match (src_elem, dst_elem) {
                (Some(s), Some(d)) if s == d => None,
                (Some(Primitive::Float), Some(Primitive::Int)) => Some(Op::ConvertFToS),
                (Some(Primitive::Float), Some(Primitive::UInt)) => Some(Op::ConvertFToU),
                (Some(Primitive::Int), Some(Primitive::Float)) => Some(Op::ConvertSToF),
                (Some(Primitive::UInt), Some(Primitive::Float)) => Some(Op::ConvertUToF),
                (Some(Primitive::Int), Some(Primitive::UInt)) |
                (Some(Primitive::UInt), Some(Primitive::Int)) => Some(Op::Bitcast),
                _ => return internal_error!(i, "No conversion from {src_ty:?} \
                    to {target_ty:?}")
            };
            match opcode {
                Some(op) => {
                    let id = self.alloc();
                    self.body.append(op, &[res_tid, id, value]);
                    Ok(id)
                },
                None => Ok(value)
            }
        } else {
            let arg_ids = args.iter()
                .map(|a| self.emit_expr(a))
                .collect::<CompileResult<Vec<u32>>>()?;
            let id = self.alloc();
            let mut operands = vec![res_tid, id];
            operands.extend(arg_ids);
            self.body.append(Op::CompositeConstruct, &operands);
            Ok(id)
        }
    }

    fn emit_expr(&mut self, e: &Expr) -> CompileResult<u32> {
        match e {
            Expr::Const {v, ..} => self.cache.const_id(v),
            Expr::VarRef {ty, i, ..} => {
                let tid = self.type_id_of(ty)?;
                match self.emit_pointer(e)? {
                    Some((ptr, _)) => {
                        let id = self.alloc();
                        self.body.append(Op::Load, &[tid, id, ptr]);
                        Ok(id)
                    },
                    None => internal_error!(i, "Variable reference without a \
                        storage slot")
                }
            },
            Expr::AccessIndex {target, index, ty, i} => {
                let tid = self.type_id_of(ty)?;
                match self.emit_pointer(e)? {
                    Some((ptr, _)) => {
                        let id = self.alloc();
                        self.body.append(Op::Load, &[tid, id, ptr]);
                        Ok(id)
                    },
                    None => {
                        let base = self.emit_expr(target)?;
                        match const_index(index) {
                            Some(n) => {
                                let id = self.alloc();
                                self.body.append(Op::CompositeExtract, &[
                                    tid, id, base, n
                                ]);
                                Ok(id)
                            },
                            None => {
                                if target.get_type().is_vector() {
                                    let idx_id = self.emit_expr(index)?;
                                    let id = self.alloc();
                                    self.body.append(Op::VectorExtractDynamic, &[
                                        tid, id, base, idx_id
                                    ]);
                                    Ok(id)
                                } else {
                                    internal_error!(i, "Dynamic indexing \
                                        requires an addressable value")
                                }
                            }
                        }
                    }
                }
            },
            Expr::Swizzle {target, comps, ty, ..} => {
                if comps.len() == 1 {
                    let tid = self.type_id_of(ty)?;
                    match self.emit_pointer(e)? {
                        Some((ptr, _)) => {
                            let id = self.alloc();
                            self.body.append(Op::Load, &[tid, id, ptr]);
                            Ok(id)
                        },
                        None => {
                            let base = self.emit_expr(target)?;
                            let id = self.alloc();
                            self.body.append(Op::CompositeExtract, &[
                                tid, id, base, comps[0].index() as u32
                            ]);
                            Ok(id)
                        }
                    }
                } else {
                    let base = self.emit_expr(target)?;
                    let tid = self.type_id_of(ty)?;
                    let id = self.alloc();
                    let mut operands = vec![tid, id, base, base];
                    operands.extend(comps.iter().map(|c| c.index() as u32));
                    self.body.append(Op::VectorShuffle, &operands);
                    Ok(id)
                }
            },
            Expr::Assign {op: AssignOp::Assign, lhs, rhs, ..} => {
                let value = self.emit_expr(rhs)?;
                self.emit_store(lhs, value)?;
                Ok(value)
            },
            Expr::Assign {i, ..} => {
                internal_error!(i, "Compound assignment reached code \
                    generation")
            },
            Expr::BinOp {lhs, op, rhs, ty, i} => {
                self.emit_binop(op, lhs, rhs, ty, i)
            },
            Expr::UnOp {op, arg, ty, i} => {
                let value = self.emit_expr(arg)?;
                let tid = self.type_id_of(ty)?;
                match op {
                    UnOp::Plus => Ok(value),
                    UnOp::Not => {
                        let id = self.alloc();
                        self.body.append(Op::LogicalNot, &[tid, id, value]);
                        Ok(id)
                    },
                    UnOp::Neg => {
                        let opcode = match ty.elem_primitive() {
                            Some(Primitive::Float) => Op::FNegate,
                            Some(Primitive::Int) => Op::SNegate,
                            _ => return internal_error!(i, "No negation \
                                instruction for {ty:?}")
                        };
                        let id = self.alloc();
                        self.body.append(opcode, &[tid, id, value]);
                        Ok(id)
                    },
                }
            },
            Expr::IfExpr {cond, thn, els, ty, ..} => {
                let cond = self.emit_expr(cond)?;
                let thn = self.emit_expr(thn)?;
                let els = self.emit_expr(els)?;
                let tid = self.type_id_of(ty)?;
                let id = self.alloc();
                self.body.append(Op::Select, &[tid, id, cond, thn, els]);
                Ok(id)
            },
            Expr::Call {func, args, ty, i} => {
                let idx = match func {
                    FuncTarget::Decl {idx} => *idx,
                    FuncTarget::Named {name} => {
                        return internal_error!(i, "Unresolved call to {name} \
                            reached code generation");
                    }
                };
                let fid = match self.func_ids.get(&idx) {
                    Some(fid) => *fid,
                    None => return internal_error!(i, "Call to function \
                        {idx} without an assigned ID")
                };
                let arg_ids = args.iter()
                    .map(|a| self.emit_expr(a))
                    .collect::<CompileResult<Vec<u32>>>()?;
                let tid = self.type_id_of(ty)?;
                let id = self.alloc();
                let mut operands = vec![tid, id, fid];
                operands.extend(arg_ids);
                self.body.append(Op::FunctionCall, &operands);
                Ok(id)
            },
            Expr::Intrinsic {op, args, ty, i} => {
                self.emit_intrinsic(op, args, ty, i)
            },
            Expr::Cast {target_ty, args, i, ..} => {
                self.emit_cast(target_ty, args, i)
            },
            e => {
                let i = e.get_info();
                internal_error!(i, "Expression kind cannot be lowered to \
                    instructions")
            }
        }
    }
}

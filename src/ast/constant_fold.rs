use super::ast::*;

fn eval_bool_binop(op: &BinOp, lv: bool, rv: bool) -> Option<ConstValue> {
    match op {
        BinOp::And => Some(ConstValue::Bool {v: lv && rv}),
        BinOp::Or => Some(ConstValue::Bool {v: lv || rv}),
        BinOp::Eq => Some(ConstValue::Bool {v: lv == rv}),
        BinOp::Neq => Some(ConstValue::Bool {v: lv != rv}),
        _ => None
    }
}

fn eval_int_binop(op: &BinOp, lv: i32, rv: i32) -> Option<ConstValue> {
    let arith = |v: i32| Some(ConstValue::Int {v});
    let cmp = |v: bool| Some(ConstValue::Bool {v});
    match op {
        BinOp::Add => arith(lv.wrapping_add(rv)),
        BinOp::Sub => arith(lv.wrapping_sub(rv)),
        BinOp::Mul => arith(lv.wrapping_mul(rv)),
        // Divisions by zero are intentionally not folded; the division is
        // left in place for the runtime to handle.
        BinOp::Div if rv != 0 => arith(lv.wrapping_div(rv)),
        BinOp::Div => None,
        BinOp::Eq => cmp(lv == rv),
        BinOp::Neq => cmp(lv != rv),
        BinOp::Lt => cmp(lv < rv),
        BinOp::Leq => cmp(lv <= rv),
        BinOp::Gt => cmp(lv > rv),
        BinOp::Geq => cmp(lv >= rv),
        BinOp::And | BinOp::Or => None
    }
}

fn eval_uint_binop(op: &BinOp, lv: u32, rv: u32) -> Option<ConstValue> {
    let arith = |v: u32| Some(ConstValue::UInt {v});
    let cmp = |v: bool| Some(ConstValue::Bool {v});
    match op {
        BinOp::Add => arith(lv.wrapping_add(rv)),
        BinOp::Sub => arith(lv.wrapping_sub(rv)),
        BinOp::Mul => arith(lv.wrapping_mul(rv)),
        BinOp::Div if rv != 0 => arith(lv / rv),
        BinOp::Div => None,
        BinOp::Eq => cmp(lv == rv),
        BinOp::Neq => cmp(lv != rv),
        BinOp::Lt => cmp(lv < rv),
        BinOp::Leq => cmp(lv <= rv),
        BinOp::Gt => cmp(lv > rv),
        BinOp::Geq => cmp(lv >= rv),
        BinOp::And | BinOp::Or => None
    }
}

fn eval_float_binop(op: &BinOp, lv: f32, rv: f32) -> Option<ConstValue> {
    let arith = |v: f32| Some(ConstValue::Float {v});
    let cmp = |v: bool| Some(ConstValue::Bool {v});
    match op {
        BinOp::Add => arith(lv + rv),
        BinOp::Sub => arith(lv - rv),
        BinOp::Mul => arith(lv * rv),
        BinOp::Div => arith(lv / rv),
        BinOp::Eq => cmp(lv == rv),
        BinOp::Neq => cmp(lv != rv),
        BinOp::Lt => cmp(lv < rv),
        BinOp::Leq => cmp(lv <= rv),
        BinOp::Gt => cmp(lv > rv),
        BinOp::Geq => cmp(lv >= rv),
        BinOp::And | BinOp::Or => None
    }
}

fn eval_fvec_binop(op: &BinOp, lc: &[f32], rc: &[f32]) -> Option<ConstValue> {
    if lc.len() != rc.len() {
        return None;
    }
    let componentwise = |f: fn(f32, f32) -> f32| {
        let comps = lc.iter().zip(rc.iter()).map(|(l, r)| f(*l, *r)).collect();
        Some(ConstValue::FVec {comps})
    };
    match op {
        BinOp::Add => componentwise(|l, r| l + r),
        BinOp::Sub => componentwise(|l, r| l - r),
        BinOp::Mul => componentwise(|l, r| l * r),
        BinOp::Div => componentwise(|l, r| l / r),
        BinOp::Eq => Some(ConstValue::Bool {v: lc == rc}),
        BinOp::Neq => Some(ConstValue::Bool {v: lc != rc}),
        _ => None
    }
}

fn eval_ivec_binop(op: &BinOp, lc: &[i32], rc: &[i32]) -> Option<ConstValue> {
    if lc.len() != rc.len() {
        return None;
    }
    let componentwise = |f: fn(i32, i32) -> i32| {
        let comps = lc.iter().zip(rc.iter()).map(|(l, r)| f(*l, *r)).collect();
        Some(ConstValue::IVec {comps})
    };
    match op {
        BinOp::Add => componentwise(|l, r| l.wrapping_add(r)),
        BinOp::Sub => componentwise(|l, r| l.wrapping_sub(r)),
        BinOp::Mul => componentwise(|l, r| l.wrapping_mul(r)),
        BinOp::Div if rc.iter().all(|r| *r != 0) =>
            componentwise(|l, r| l.wrapping_div(r)),
        BinOp::Eq => Some(ConstValue::Bool {v: lc == rc}),
        BinOp::Neq => Some(ConstValue::Bool {v: lc != rc}),
        _ => None
    }
}

fn scale_fvec(op: &BinOp, comps: &[f32], scalar: f32) -> Option<ConstValue> {
    match op {
        BinOp::Mul => {
            let comps = comps.iter().map(|c| c * scalar).collect();
            Some(ConstValue::FVec {comps})
        },
        _ => None
    }
}

pub fn eval_binop(op: &BinOp, lhs: &ConstValue, rhs: &ConstValue) -> Option<ConstValue> {
    match (lhs, rhs) {
        (ConstValue::Bool {v: lv}, ConstValue::Bool {v: rv}) =>
            eval_bool_binop(op, *lv, *rv),
        (ConstValue::Int {v: lv}, ConstValue::Int {v: rv}) =>
            eval_int_binop(op, *lv, *rv),
        (ConstValue::UInt {v: lv}, ConstValue::UInt {v: rv}) =>
            eval_uint_binop(op, *lv, *rv),
        (ConstValue::Float {v: lv}, ConstValue::Float {v: rv}) =>
            eval_float_binop(op, *lv, *rv),
        (ConstValue::FVec {comps: lc}, ConstValue::FVec {comps: rc}) =>
            eval_fvec_binop(op, lc, rc),
        (ConstValue::IVec {comps: lc}, ConstValue::IVec {comps: rc}) =>
            eval_ivec_binop(op, lc, rc),
        (ConstValue::FVec {comps}, ConstValue::Float {v}) |
        (ConstValue::Float {v}, ConstValue::FVec {comps}) =>
            scale_fvec(op, comps, *v),
        _ => None
    }
}

pub fn eval_unop(op: &UnOp, arg: &ConstValue) -> Option<ConstValue> {
    match (op, arg) {
        (UnOp::Not, ConstValue::Bool {v}) => Some(ConstValue::Bool {v: !v}),
        (UnOp::Neg, ConstValue::Int {v}) =>
            Some(ConstValue::Int {v: v.wrapping_neg()}),
        (UnOp::Neg, ConstValue::Float {v}) => Some(ConstValue::Float {v: -v}),
        (UnOp::Neg, ConstValue::FVec {comps}) => {
            let comps = comps.iter().map(|c| -c).collect();
            Some(ConstValue::FVec {comps})
        },
        (UnOp::Neg, ConstValue::IVec {comps}) => {
            let comps = comps.iter().map(|c| c.wrapping_neg()).collect();
            Some(ConstValue::IVec {comps})
        },
        (UnOp::Plus, v) => Some(v.clone()),
        _ => None
    }
}

pub fn eval_swizzle(arg: &ConstValue, comps: &[SwizzleComponent]) -> Option<ConstValue> {
    match arg {
        ConstValue::FVec {comps: elems} => {
            let picked = comps.iter()
                .map(|c| elems.get(c.index()).copied())
                .collect::<Option<Vec<f32>>>()?;
            if picked.len() == 1 {
                Some(ConstValue::Float {v: picked[0]})
            } else {
                Some(ConstValue::FVec {comps: picked})
            }
        },
        ConstValue::IVec {comps: elems} => {
            let picked = comps.iter()
                .map(|c| elems.get(c.index()).copied())
                .collect::<Option<Vec<i32>>>()?;
            if picked.len() == 1 {
                Some(ConstValue::Int {v: picked[0]})
            } else {
                Some(ConstValue::IVec {comps: picked})
            }
        },
        ConstValue::Float {v} => {
            if comps.iter().all(|c| c.index() == 0) {
                if comps.len() == 1 {
                    Some(ConstValue::Float {v: *v})
                } else {
                    Some(ConstValue::FVec {comps: vec![*v; comps.len()]})
                }
            } else {
                None
            }
        },
        _ => None
    }
}

// Extracts one component of a constant vector.
pub fn eval_index(arg: &ConstValue, idx: usize) -> Option<ConstValue> {
    match arg {
        ConstValue::FVec {comps} => {
            comps.get(idx).map(|v| ConstValue::Float {v: *v})
        },
        ConstValue::IVec {comps} => {
            comps.get(idx).map(|v| ConstValue::Int {v: *v})
        },
        _ => None
    }
}

fn scalar_components(v: &ConstValue) -> Option<Vec<ConstValue>> {
    match v {
        ConstValue::Int {..} | ConstValue::UInt {..} | ConstValue::Float {..} =>
            Some(vec![v.clone()]),
        ConstValue::FVec {comps} =>
            Some(comps.iter().map(|c| ConstValue::Float {v: *c}).collect()),
        ConstValue::IVec {comps} =>
            Some(comps.iter().map(|c| ConstValue::Int {v: *c}).collect()),
        ConstValue::Bool {..} => None
    }
}

fn convert_scalar(target: &Primitive, v: &ConstValue) -> Option<ConstValue> {
    match (target, v) {
        (Primitive::Float, ConstValue::Float {v}) => Some(ConstValue::Float {v: *v}),
        (Primitive::Float, ConstValue::Int {v}) =>
            Some(ConstValue::Float {v: *v as f32}),
        (Primitive::Float, ConstValue::UInt {v}) =>
            Some(ConstValue::Float {v: *v as f32}),
        (Primitive::Int, ConstValue::Int {v}) => Some(ConstValue::Int {v: *v}),
        (Primitive::Int, ConstValue::UInt {v}) =>
            Some(ConstValue::Int {v: *v as i32}),
        (Primitive::Int, ConstValue::Float {v}) =>
            Some(ConstValue::Int {v: *v as i32}),
        (Primitive::UInt, ConstValue::UInt {v}) => Some(ConstValue::UInt {v: *v}),
        (Primitive::UInt, ConstValue::Int {v}) =>
            Some(ConstValue::UInt {v: *v as u32}),
        (Primitive::UInt, ConstValue::Float {v}) =>
            Some(ConstValue::UInt {v: *v as u32}),
        _ => None
    }
}

pub fn eval_cast(target: &Type, args: &[&ConstValue]) -> Option<ConstValue> {
    match target {
        Type::Primitive {ty} => {
            if args.len() == 1 {
                convert_scalar(ty, args[0])
            } else {
                None
            }
        },
        Type::Vector {dim, elem} => {
            let comps = args.iter()
                .map(|v| scalar_components(v))
                .collect::<Option<Vec<Vec<ConstValue>>>>()?
                .into_iter()
                .flatten()
                .map(|v| convert_scalar(elem, &v))
                .collect::<Option<Vec<ConstValue>>>()?;
            if comps.len() != *dim {
                return None;
            }
            match elem {
                Primitive::Float => {
                    let comps = comps.iter()
                        .map(|v| match v {
                            ConstValue::Float {v} => Some(*v),
                            _ => None
                        })
                        .collect::<Option<Vec<f32>>>()?;
                    Some(ConstValue::FVec {comps})
                },
                Primitive::Int => {
                    let comps = comps.iter()
                        .map(|v| match v {
                            ConstValue::Int {v} => Some(*v),
                            _ => None
                        })
                        .collect::<Option<Vec<i32>>>()?;
                    Some(ConstValue::IVec {comps})
                },
                _ => None
            }
        },
        _ => None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn int(v: i32) -> ConstValue {
        ConstValue::Int {v}
    }

    fn float(v: f32) -> ConstValue {
        ConstValue::Float {v}
    }

    fn boolean(v: bool) -> ConstValue {
        ConstValue::Bool {v}
    }

    fn fvec(comps: Vec<f32>) -> ConstValue {
        ConstValue::FVec {comps}
    }

    #[test]
    fn int_add() {
        assert_eq!(eval_binop(&BinOp::Add, &int(2), &int(3)), Some(int(5)));
    }

    #[test]
    fn int_div_zero_not_folded() {
        assert_eq!(eval_binop(&BinOp::Div, &int(3), &int(0)), None);
    }

    #[test]
    fn int_comparison() {
        assert_eq!(eval_binop(&BinOp::Lt, &int(2), &int(3)), Some(boolean(true)));
    }

    #[test]
    fn bool_and() {
        let r = eval_binop(&BinOp::And, &boolean(true), &boolean(false));
        assert_eq!(r, Some(boolean(false)));
    }

    #[test]
    fn bool_add_not_folded() {
        assert_eq!(eval_binop(&BinOp::Add, &boolean(true), &boolean(false)), None);
    }

    #[test]
    fn float_mul() {
        assert_eq!(
            eval_binop(&BinOp::Mul, &float(2.0), &float(1.5)),
            Some(float(3.0))
        );
    }

    #[test]
    fn mixed_operands_not_folded() {
        assert_eq!(eval_binop(&BinOp::Add, &int(1), &float(1.0)), None);
    }

    #[test]
    fn vector_add() {
        let r = eval_binop(
            &BinOp::Add,
            &fvec(vec![1.0, 2.0, 3.0]),
            &fvec(vec![0.5, 0.5, 0.5])
        );
        assert_eq!(r, Some(fvec(vec![1.5, 2.5, 3.5])));
    }

    #[test]
    fn vector_scalar_mul_either_order() {
        let v = fvec(vec![1.0, 2.0]);
        let expected = Some(fvec(vec![2.0, 4.0]));
        assert_eq!(eval_binop(&BinOp::Mul, &v, &float(2.0)), expected);
        assert_eq!(eval_binop(&BinOp::Mul, &float(2.0), &v), expected);
    }

    #[test]
    fn vector_length_mismatch_not_folded() {
        let r = eval_binop(
            &BinOp::Add,
            &fvec(vec![1.0, 2.0]),
            &fvec(vec![1.0, 2.0, 3.0])
        );
        assert_eq!(r, None);
    }

    #[test]
    fn vector_equality() {
        let v = fvec(vec![1.0, 2.0]);
        assert_eq!(eval_binop(&BinOp::Eq, &v, &v), Some(boolean(true)));
    }

    #[test]
    fn unary_neg_int() {
        assert_eq!(eval_unop(&UnOp::Neg, &int(5)), Some(int(-5)));
    }

    #[test]
    fn unary_not_bool() {
        assert_eq!(eval_unop(&UnOp::Not, &boolean(false)), Some(boolean(true)));
    }

    #[test]
    fn unary_not_int_not_folded() {
        assert_eq!(eval_unop(&UnOp::Not, &int(1)), None);
    }

    #[test]
    fn swizzle_vector() {
        use SwizzleComponent::*;
        let r = eval_swizzle(&fvec(vec![1.0, 2.0, 3.0]), &[Z, X]);
        assert_eq!(r, Some(fvec(vec![3.0, 1.0])));
    }

    #[test]
    fn swizzle_single_component_gives_scalar() {
        use SwizzleComponent::*;
        let r = eval_swizzle(&fvec(vec![1.0, 2.0, 3.0]), &[Y]);
        assert_eq!(r, Some(float(2.0)));
    }

    #[test]
    fn swizzle_scalar_repetition() {
        use SwizzleComponent::*;
        let r = eval_swizzle(&float(1.5), &[X, X, X]);
        assert_eq!(r, Some(fvec(vec![1.5, 1.5, 1.5])));
    }

    #[test]
    fn swizzle_out_of_range() {
        use SwizzleComponent::*;
        assert_eq!(eval_swizzle(&fvec(vec![1.0, 2.0]), &[W]), None);
    }

    #[test]
    fn index_vector() {
        assert_eq!(eval_index(&fvec(vec![1.0, 2.0]), 1), Some(float(2.0)));
        assert_eq!(eval_index(&fvec(vec![1.0, 2.0]), 2), None);
    }

    #[test]
    fn cast_composes_vector() {
        let args = [&float(1.0), &float(2.0), &float(3.0)];
        let ty = Type::vec(3, Primitive::Float);
        assert_eq!(eval_cast(&ty, &args), Some(fvec(vec![1.0, 2.0, 3.0])));
    }

    #[test]
    fn cast_flattens_vectors() {
        let v = fvec(vec![1.0, 2.0, 3.0]);
        let args = [&v, &float(4.0)];
        let ty = Type::vec(4, Primitive::Float);
        assert_eq!(eval_cast(&ty, &args), Some(fvec(vec![1.0, 2.0, 3.0, 4.0])));
    }

    #[test]
    fn cast_int_to_float() {
        assert_eq!(eval_cast(&Type::float(), &[&int(3)]), Some(float(3.0)));
    }

    #[test]
    fn cast_float_to_int_truncates() {
        assert_eq!(eval_cast(&Type::int(), &[&float(2.7)]), Some(int(2)));
    }

    #[test]
    fn cast_component_mismatch_not_folded() {
        let args = [&float(1.0), &float(2.0)];
        let ty = Type::vec(3, Primitive::Float);
        assert_eq!(eval_cast(&ty, &args), None);
    }
}

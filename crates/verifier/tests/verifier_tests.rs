//! Integration tests for the ILVM verifier, driven through `verify`.

use ilvm_common::{
    CodeWriter, ExceptionRegion, MethodAttributes, MethodBody, MethodRef, Opcode, Primitive,
    RegionKind, Signature, StackItem, Type, TypeSystem, TypeUniverse, WellKnown,
};
use ilvm_verifier::{
    scan, verify, StackFault, TraceCoder, Verified, VerifyError, VerifyOptions,
};
use proptest::prelude::*;

fn body(code: Vec<u8>, max_stack: u32, ret: Primitive) -> MethodBody {
    MethodBody::new(code, max_stack, Signature::new(vec![], ret.into()))
}

fn check(method: &MethodBody, universe: &TypeUniverse) -> (Result<Verified, VerifyError>, TraceCoder) {
    let mut coder = TraceCoder::new();
    let result = verify(method, universe, &mut coder, &VerifyOptions::default());
    (result, coder)
}

/// `try { nop } catch { stloc.0 }` with both blocks leaving to a `ret`.
fn catch_method(class_token: u32, local: Type) -> MethodBody {
    let mut w = CodeWriter::new();
    let end = w.label();
    w.op(Opcode::Nop).branch(Opcode::LeaveS, end);
    w.op(Opcode::Stloc0).branch(Opcode::LeaveS, end);
    w.mark(end).op(Opcode::Ret);
    let mut method = body(w.finish().unwrap(), 1, Primitive::Void);
    method.locals = vec![local];
    method.regions = vec![ExceptionRegion {
        kind: RegionKind::Catch { class_token },
        try_offset: 0,
        try_length: 3,
        handler_offset: 3,
        handler_length: 3,
    }];
    method
}

// ========================================================
// Accepted methods
// ========================================================

#[test]
fn accept_arithmetic() {
    let mut w = CodeWriter::new();
    w.ldc_i4(5).ldc_i4(3).op(Opcode::Add).op(Opcode::Ret);
    let method = body(w.finish().unwrap(), 2, Primitive::I4);
    let (result, coder) = check(&method, &TypeUniverse::new());
    assert_eq!(
        result,
        Ok(Verified {
            restarts: 0,
            labels: 0,
            max_stack: 2
        })
    );
    assert_eq!(coder.setups(), 1);
    assert!(!coder.abandoned());
}

#[test]
fn accept_counting_loop() {
    let mut w = CodeWriter::new();
    w.op(Opcode::LdcI40).op(Opcode::Stloc0);
    let head = w.here();
    w.op(Opcode::Ldloc0)
        .op(Opcode::LdcI41)
        .op(Opcode::Add)
        .op(Opcode::Dup)
        .op(Opcode::Stloc0)
        .ldc_i4_s(10)
        .branch(Opcode::BltS, head)
        .op(Opcode::Ret);
    let mut method = body(w.finish().unwrap(), 2, Primitive::Void);
    method.locals = vec![Primitive::I4.into()];
    let (result, _) = check(&method, &TypeUniverse::new());
    assert_eq!(result.map(|v| v.labels), Ok(1));
}

#[test]
fn accept_catch_handler() {
    let mut universe = TypeUniverse::new();
    let exception = universe.well_known(WellKnown::Exception);
    let foo = universe.add_class("FooException", exception);
    let token = universe.type_token(Type::Class(foo));
    let method = catch_method(token, Type::Class(foo));

    let (result, coder) = check(&method, &universe);
    // Try start, handler start and the leave target.
    assert_eq!(
        result,
        Ok(Verified {
            restarts: 0,
            labels: 3,
            max_stack: 1
        })
    );
    let expected = format!("stloc 0 {}", StackItem::object(Type::Class(foo)));
    assert!(coder.lines().contains(&expected));
}

#[test]
fn accept_catch_into_base_class_local() {
    let mut universe = TypeUniverse::new();
    let exception = universe.well_known(WellKnown::Exception);
    let foo = universe.add_class("FooException", exception);
    let token = universe.type_token(Type::Class(foo));
    let method = catch_method(token, Type::Class(exception));

    let (result, _) = check(&method, &universe);
    assert!(result.is_ok());
}

#[test]
fn accept_unsafe_pointer_code_only_when_enabled() {
    let mut w = CodeWriter::new();
    w.op_u1(Opcode::LdargaS, 0)
        .op(Opcode::LdcI44)
        .op(Opcode::Add)
        .op(Opcode::LdindI4)
        .op(Opcode::Ret);
    let method = MethodBody::new(
        w.finish().unwrap(),
        2,
        Signature::new(vec![Primitive::I4.into()], Primitive::I4.into()),
    );
    let universe = TypeUniverse::new();

    let (result, coder) = check(&method, &universe);
    assert!(matches!(result, Err(VerifyError::TypeError { at: 3, .. })));
    assert!(coder.abandoned());

    let mut coder = TraceCoder::new();
    let result = verify(&method, &universe, &mut coder, &VerifyOptions::unsafe_pointers());
    assert!(result.is_ok());
}

#[test]
fn accept_static_call() {
    let mut universe = TypeUniverse::new();
    let object = universe.well_known(WellKnown::Object);
    let math = universe.add_class("Math", object);
    let i4: Type = Primitive::I4.into();
    let token = universe.method_token(MethodRef {
        owner: Type::Class(math),
        name: "Max".to_string(),
        signature: Signature::new(vec![i4.clone(), i4.clone()], i4),
        attributes: MethodAttributes::STATIC,
    });

    let mut w = CodeWriter::new();
    w.op(Opcode::Ldarg0).op(Opcode::Ldarg1).token(Opcode::Call, token).op(Opcode::Ret);
    let method = MethodBody::new(
        w.finish().unwrap(),
        2,
        Signature::new(
            vec![Primitive::I4.into(), Primitive::I4.into()],
            Primitive::I4.into(),
        ),
    );
    let (result, coder) = check(&method, &universe);
    assert!(result.is_ok());
    assert_eq!(coder.lines()[2], "call Static Max [I4, I4] -> I4");
}

#[test]
fn accept_join_of_sibling_classes() {
    let mut universe = TypeUniverse::new();
    let object = universe.well_known(WellKnown::Object);
    let animal = universe.add_class("Animal", object);
    let dog = universe.add_class("Dog", animal);
    let cat = universe.add_class("Cat", animal);

    // flag ? cat : dog, returned as Animal.
    let mut w = CodeWriter::new();
    let other = w.label();
    let join = w.label();
    w.op(Opcode::Ldarg2).branch(Opcode::BrtrueS, other);
    w.op(Opcode::Ldarg0).branch(Opcode::BrS, join);
    w.mark(other).op(Opcode::Ldarg1);
    w.mark(join).op(Opcode::Ret);
    let method = MethodBody::new(
        w.finish().unwrap(),
        1,
        Signature::new(
            vec![Type::Class(dog), Type::Class(cat), Primitive::I4.into()],
            Type::Class(animal),
        ),
    );

    let (result, coder) = check(&method, &universe);
    assert!(result.is_ok(), "{result:?}");
    let widened = StackItem::object(Type::Class(animal));
    assert_eq!(
        coder.lines().last().map(String::as_str),
        Some(format!("ret {widened}").as_str())
    );
    assert!(coder.lines().contains(&format!("refresh [{widened}]")));
}

// ========================================================
// Coder restarts
// ========================================================

#[test]
fn restart_reruns_whole_session() {
    let mut w = CodeWriter::new();
    w.op(Opcode::LdcI41).op(Opcode::Pop).op(Opcode::Ret);
    let method = body(w.finish().unwrap(), 1, Primitive::Void);

    let mut coder = TraceCoder::with_restarts(2);
    let result = verify(&method, &TypeUniverse::new(), &mut coder, &VerifyOptions::default());
    assert_eq!(result.map(|v| v.restarts), Ok(2));
    assert_eq!(coder.setups(), 3);
    // Only the last session's output survives.
    assert_eq!(coder.lines(), &["ldc.i4 1", "pop I4", "ret"]);
}

#[test]
fn too_many_restarts_is_out_of_memory() {
    let mut w = CodeWriter::new();
    w.op(Opcode::Ret);
    let method = body(w.finish().unwrap(), 0, Primitive::Void);
    let options = VerifyOptions {
        max_restarts: 1,
        ..VerifyOptions::default()
    };

    let mut coder = TraceCoder::with_restarts(5);
    let result = verify(&method, &TypeUniverse::new(), &mut coder, &options);
    assert_eq!(result, Err(VerifyError::OutOfMemory));
    assert_eq!(coder.setups(), 2);
    assert!(coder.abandoned());
}

// ========================================================
// Rejected methods
// ========================================================

#[test]
fn reject_empty_method() {
    let method = body(Vec::new(), 0, Primitive::Void);
    let (result, coder) = check(&method, &TypeUniverse::new());
    assert_eq!(result, Err(VerifyError::FallOffEnd { at: 0 }));
    assert!(coder.abandoned());
}

#[test]
fn reject_oversized_max_stack_before_setup() {
    let mut w = CodeWriter::new();
    w.op(Opcode::Ret);
    let method = body(w.finish().unwrap(), 70_000, Primitive::Void);
    let (result, coder) = check(&method, &TypeUniverse::new());
    assert_eq!(
        result,
        Err(VerifyError::StackError {
            at: 0,
            fault: StackFault::Overflow
        })
    );
    assert_eq!(coder.setups(), 0);
    assert!(!coder.abandoned());
}

#[test]
fn reject_invalid_opcode() {
    let method = body(vec![0x24], 0, Primitive::Void);
    let (result, _) = check(&method, &TypeUniverse::new());
    assert_eq!(result, Err(VerifyError::InvalidOpcode { at: 0 }));
}

#[test]
fn reject_truncated_operand() {
    let mut w = CodeWriter::new();
    w.ldc_i4(7);
    let mut code = w.finish().unwrap();
    code.truncate(3);
    let method = body(code, 1, Primitive::Void);
    let (result, _) = check(&method, &TypeUniverse::new());
    assert_eq!(result, Err(VerifyError::Truncated { at: 0 }));
}

#[test]
fn reject_branch_into_instruction() {
    let mut w = CodeWriter::new();
    w.ldc_i4(1).op(Opcode::Pop).branch_raw(Opcode::BrS, -7).op(Opcode::Ret);
    let method = body(w.finish().unwrap(), 1, Primitive::Void);
    let (result, _) = check(&method, &TypeUniverse::new());
    assert_eq!(
        result,
        Err(VerifyError::BranchOutOfRange { at: 6, target: 1 })
    );
}

#[test]
fn reject_join_with_different_heights() {
    let mut w = CodeWriter::new();
    let skip = w.label();
    w.op(Opcode::LdcI40).branch(Opcode::BrtrueS, skip);
    w.op(Opcode::LdcI41);
    w.mark(skip).op(Opcode::Ret);
    let method = body(w.finish().unwrap(), 1, Primitive::Void);
    let (result, _) = check(&method, &TypeUniverse::new());
    assert_eq!(
        result,
        Err(VerifyError::StackError {
            at: 4,
            fault: StackFault::HeightMismatch
        })
    );
}

#[test]
fn reject_join_with_different_slots() {
    let mut w = CodeWriter::new();
    let other = w.label();
    let join = w.label();
    w.op(Opcode::Ldarg0).branch(Opcode::BrtrueS, other);
    w.op(Opcode::LdcI41).branch(Opcode::BrS, join);
    w.mark(other).ldc_r8(1.0);
    w.mark(join).op(Opcode::Pop).op(Opcode::Ret);
    let method = MethodBody::new(
        w.finish().unwrap(),
        1,
        Signature::new(vec![Primitive::I4.into()], Primitive::Void.into()),
    );
    let (result, _) = check(&method, &TypeUniverse::new());
    assert_eq!(
        result,
        Err(VerifyError::StackError {
            at: 15,
            fault: StackFault::SlotMismatch
        })
    );
}

#[test]
fn reject_empty_try_block() {
    let universe = TypeUniverse::new();
    let exception = universe.well_known(WellKnown::Exception);
    let mut method = catch_method(0, Type::Class(exception));
    method.regions[0].kind = RegionKind::Finally;
    method.regions[0].try_length = 0;
    let (result, _) = check(&method, &universe);
    assert_eq!(
        result,
        Err(VerifyError::BranchOutOfRange { at: 0, target: 0 })
    );
}

#[test]
fn reject_handler_past_end() {
    let universe = TypeUniverse::new();
    let exception = universe.well_known(WellKnown::Exception);
    let mut method = catch_method(0, Type::Class(exception));
    method.regions[0].kind = RegionKind::Fault;
    method.regions[0].handler_length = 10;
    let (result, _) = check(&method, &universe);
    assert_eq!(
        result,
        Err(VerifyError::BranchOutOfRange { at: 3, target: 13 })
    );
}

#[test]
fn reject_catch_of_value_type() {
    let mut universe = TypeUniverse::new();
    let token = universe.type_token(Primitive::I4.into());
    let method = catch_method(token, Primitive::I4.into());
    let (result, _) = check(&method, &universe);
    assert_eq!(
        result,
        Err(VerifyError::TypeError {
            at: 3,
            operand: Some("catch type")
        })
    );
}

#[test]
fn reject_conflicting_handler_seeds() {
    let mut universe = TypeUniverse::new();
    let exception = universe.well_known(WellKnown::Exception);
    let foo = universe.add_class("FooException", exception);
    let bar = universe.add_class("BarException", exception);
    let foo_token = universe.type_token(Type::Class(foo));
    let bar_token = universe.type_token(Type::Class(bar));

    let mut method = catch_method(foo_token, Type::Class(exception));
    let mut second = method.regions[0];
    second.kind = RegionKind::Catch {
        class_token: bar_token,
    };
    method.regions.push(second);

    let (result, _) = check(&method, &universe);
    assert_eq!(
        result,
        Err(VerifyError::StackError {
            at: 3,
            fault: StackFault::ConflictingSeed
        })
    );
}

#[test]
fn reject_inaccessible_type() {
    let mut universe = TypeUniverse::new();
    let object = universe.well_known(WellKnown::Object);
    let hidden = universe.add_class("Hidden", object);
    universe.set_accessible(hidden, false);
    let token = universe.type_token(Type::Class(hidden));

    let mut w = CodeWriter::new();
    w.op(Opcode::Ldnull).token(Opcode::Castclass, token).op(Opcode::Pop).op(Opcode::Ret);
    let method = body(w.finish().unwrap(), 1, Primitive::Void);
    let (result, _) = check(&method, &universe);
    assert_eq!(
        result,
        Err(VerifyError::TypeError {
            at: 1,
            operand: Some("token")
        })
    );
}

// ========================================================
// Properties
// ========================================================

proptest! {
    #[test]
    fn scan_never_panics(code in proptest::collection::vec(any::<u8>(), 0..64)) {
        match scan(&code) {
            Ok(mask) => prop_assert_eq!(mask.len() as usize, code.len()),
            Err(err) => prop_assert!(matches!(
                err,
                VerifyError::Truncated { .. }
                    | VerifyError::InvalidOpcode { .. }
                    | VerifyError::BranchOutOfRange { .. }
            ), "unexpected scan error: {:?}", err),
        }
    }

    #[test]
    fn verify_rejection_abandons_coder(
        code in proptest::collection::vec(any::<u8>(), 0..48),
        max_stack in 0u32..8,
    ) {
        let method = body(code, max_stack, Primitive::Void);
        let mut coder = TraceCoder::new();
        let result = verify(&method, &TypeUniverse::new(), &mut coder, &VerifyOptions::default());
        prop_assert_eq!(result.is_err(), coder.abandoned());
    }

    #[test]
    fn short_branch_outside_method_rejected(displacement in any::<i8>()) {
        // br.s at 0, ret at 2: only targets 0 and 2 start an instruction.
        let target = 2 + i64::from(displacement);
        prop_assume!(target != 0 && target != 2);

        let mut w = CodeWriter::new();
        w.branch_raw(Opcode::BrS, i32::from(displacement)).op(Opcode::Ret);
        let method = body(w.finish().unwrap(), 0, Primitive::Void);
        let mut coder = TraceCoder::new();
        let result = verify(&method, &TypeUniverse::new(), &mut coder, &VerifyOptions::default());
        prop_assert_eq!(result, Err(VerifyError::BranchOutOfRange { at: 0, target }));
    }
}

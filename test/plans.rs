//! Call Plan Integration Tests
//!
//! Placement tables for every supported ABI. Planning is pure, so these run
//! on any host.

use dlbridge::ffi::{plan, CallPlan, FfiError, Location, ReturnLocation, SignatureRegistry, TypeClass};
use dlbridge::Abi;

use Location::{FloatReg, IntReg, Mirrored, Stack};
use TypeClass::*;

fn locations(plan: &CallPlan) -> Vec<Location> {
    plan.slots.iter().map(|s| s.location).collect()
}

const MIXED: [TypeClass; 5] = [I32, F64, I64, F32, Pointer];

#[test]
fn test_independent_cursor_abis() {
    for abi in [Abi::SysVAmd64, Abi::Aapcs64, Abi::DarwinAarch64, Abi::RiscV64] {
        let p = plan(&MIXED, F64, abi).unwrap();
        assert_eq!(
            locations(&p),
            vec![IntReg(0), FloatReg(0), IntReg(1), FloatReg(1), IntReg(2)],
            "{}",
            abi
        );
        assert_eq!(p.stack_bytes, 0);
        assert_eq!(p.ret_location, ReturnLocation::Float);
    }
}

#[test]
fn test_win64_positional_slots() {
    let p = plan(&MIXED, F64, Abi::Win64).unwrap();
    assert_eq!(
        locations(&p),
        vec![IntReg(0), FloatReg(1), IntReg(2), FloatReg(3), Stack { offset: 32 }]
    );
    // Shadow space plus one stack word
    assert_eq!(p.stack_bytes, 40);
}

#[test]
fn test_win64_shadow_space_without_stack_arguments() {
    let p = plan(&[I64], I64, Abi::Win64).unwrap();
    assert_eq!(p.stack_bytes, 32);
}

#[test]
fn test_sysv_seventh_integer_spills() {
    let p = plan(&[I64; 7], I64, Abi::SysVAmd64).unwrap();
    assert_eq!(p.slots[5].location, IntReg(5));
    assert_eq!(p.slots[6].location, Stack { offset: 0 });
    assert_eq!(p.stack_bytes, 8);
}

#[test]
fn test_aarch64_stack_words_versus_darwin_packing() {
    let ints = [I32; 10];

    let linux = plan(&ints, I32, Abi::Aapcs64).unwrap();
    assert_eq!(linux.slots[8].location, Stack { offset: 0 });
    assert_eq!(linux.slots[9].location, Stack { offset: 8 });
    assert_eq!(linux.stack_bytes, 16);

    let darwin = plan(&ints, I32, Abi::DarwinAarch64).unwrap();
    assert_eq!(darwin.slots[8].location, Stack { offset: 0 });
    assert_eq!(darwin.slots[9].location, Stack { offset: 4 });
    assert_eq!(darwin.stack_bytes, 8);
}

#[test]
fn test_riscv_floats_fall_back_to_integer_registers() {
    let p = plan(&[F64; 9], F64, Abi::RiscV64).unwrap();
    assert_eq!(p.slots[7].location, FloatReg(7));
    assert_eq!(p.slots[8].location, IntReg(0));
}

#[test]
fn test_variadic_floats() {
    let win = Abi::Win64.convention().plan(&[Pointer, F64], I32, true).unwrap();
    assert_eq!(locations(&win), vec![IntReg(0), Mirrored(1)]);

    let riscv = Abi::RiscV64.convention().plan(&[Pointer, F64], I32, true).unwrap();
    assert_eq!(locations(&riscv), vec![IntReg(0), IntReg(1)]);
}

#[test]
fn test_return_locations() {
    for abi in Abi::ALL {
        assert_eq!(plan(&[], Void, abi).unwrap().ret_location, ReturnLocation::None);
        assert_eq!(plan(&[], Bool, abi).unwrap().ret_location, ReturnLocation::IntLowByte);
        assert_eq!(plan(&[], F32, abi).unwrap().ret_location, ReturnLocation::Float);
        assert_eq!(plan(&[], CString, abi).unwrap().ret_location, ReturnLocation::Int);
    }
}

#[test]
fn test_argument_ceiling() {
    for abi in Abi::ALL {
        assert!(plan(&[I64; 15], I64, abi).is_ok());
        assert_eq!(
            plan(&[I64; 16], I64, abi).unwrap_err(),
            FfiError::TooManyArguments { count: 16, max: 15 }
        );
    }
}

#[test]
fn test_registry_caches_per_shape() {
    let registry = SignatureRegistry::new(Abi::Aapcs64);
    let a = registry.plan(&MIXED, F64).unwrap();
    let b = registry.plan(&MIXED, F64).unwrap();
    assert!(std::sync::Arc::ptr_eq(&a, &b));
    registry.plan(&MIXED, F32).unwrap();
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_plan_json_shape() {
    let p = plan(&[I32, F64], Bool, Abi::SysVAmd64).unwrap();
    let json = serde_json::to_value(&p).unwrap();
    assert_eq!(json["abi"], "sysv-amd64");
    assert_eq!(json["slots"][1]["location"]["kind"], "float_reg");
    assert_eq!(json["ret_location"], "int_low_byte");
}

//! Call plans
//!
//! A [`CallPlan`] is the immutable result of classifying one function
//! shape for one ABI. It is computed once, cached by the registry and
//! shared by every outbound call and trampoline using that shape.

use std::fmt::Write as _;

use serde::Serialize;

use super::types::{Signature, TypeClass};
use crate::arch::Abi;

/// Fixed argument ceiling of the generic call path; typed plans share it.
pub const MAX_ARGS: usize = 15;

/// Where one argument travels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum Location {
    /// Integer argument register, by allocation index
    IntReg(u8),
    /// Floating argument register, by allocation index
    FloatReg(u8),
    /// Floating register and the integer register of the same index
    /// (Win64 generic calls)
    Mirrored(u8),
    /// Byte offset from the stack pointer at the call instruction,
    /// any shadow area included
    Stack { offset: u32 },
}

/// Where the return value comes back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnLocation {
    /// Nothing is returned
    None,
    /// Primary integer return register
    Int,
    /// Primary integer return register, least significant byte only
    IntLowByte,
    /// Primary floating return register
    Float,
}

/// One classified parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ArgSlot {
    pub class: TypeClass,
    pub location: Location,
}

/// Register and stack assignment of a whole function shape for one ABI
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CallPlan {
    pub abi: Abi,
    pub slots: Vec<ArgSlot>,
    pub ret: TypeClass,
    pub ret_location: ReturnLocation,
    /// Floating argument registers consumed
    pub float_regs_used: u8,
    /// Size of the outgoing stack area, shadow space included
    pub stack_bytes: u32,
    /// Planned for the generic call path
    pub variadic: bool,
}

impl CallPlan {
    /// Number of parameters
    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    /// Parameter classes in declaration order
    pub fn params(&self) -> impl Iterator<Item = TypeClass> + '_ {
        self.slots.iter().map(|slot| slot.class)
    }

    /// The signature this plan was built from
    pub fn signature(&self) -> Signature {
        Signature::new(self.params().collect(), self.ret)
    }

    /// Outgoing stack area in machine words
    pub fn stack_words(&self) -> usize {
        (self.stack_bytes as usize).div_ceil(8)
    }

    /// Human readable placement table using the ABI's register names
    pub fn describe(&self) -> String {
        let cc = self.abi.convention();
        let ints = cc.int_arg_registers();
        let floats = cc.float_arg_registers();
        let (int_ret, float_ret) = cc.return_registers();

        let mut out = String::new();
        let _ = writeln!(out, "abi: {}", self.abi);
        for (index, slot) in self.slots.iter().enumerate() {
            let place = match slot.location {
                Location::IntReg(r) => ints[r as usize].to_string(),
                Location::FloatReg(r) => floats[r as usize].to_string(),
                Location::Mirrored(r) => {
                    format!("{} + {}", floats[r as usize], ints[r as usize])
                }
                Location::Stack { offset } => format!("[sp+{}]", offset),
            };
            let _ = writeln!(out, "  arg{:<2} {:<5} -> {}", index, slot.class, place);
        }
        let ret = match self.ret_location {
            ReturnLocation::None => "-".to_string(),
            ReturnLocation::Int => int_ret.to_string(),
            ReturnLocation::IntLowByte => format!("{} (low byte)", int_ret),
            ReturnLocation::Float => float_ret.to_string(),
        };
        let _ = writeln!(out, "  ret   {:<5} -> {}", self.ret, ret);
        if self.stack_bytes > 0 {
            let _ = writeln!(out, "  stack {} bytes", self.stack_bytes);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_names_registers() {
        let plan = Abi::SysVAmd64
            .convention()
            .plan(
                &[TypeClass::I32, TypeClass::F64, TypeClass::CString],
                TypeClass::Bool,
                false,
            )
            .unwrap();
        let text = plan.describe();
        assert!(text.contains("rdi"));
        assert!(text.contains("xmm0"));
        assert!(text.contains("rsi"));
        assert!(text.contains("rax (low byte)"));
        assert_eq!(plan.signature().params.len(), 3);
    }

    #[test]
    fn test_plan_serializes() {
        let plan = Abi::Win64
            .convention()
            .plan(&[TypeClass::F64], TypeClass::F64, true)
            .unwrap();
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["abi"], "win64");
        assert_eq!(json["slots"][0]["location"]["kind"], "mirrored");
        assert_eq!(json["ret_location"], "float");
    }
}

//! Signature Registry
//!
//! Central cache of call plans. Planning is a pure function of the
//! parameter classes, the return class and the ABI, so every distinct
//! shape is classified once and the resulting [`CallPlan`] is shared.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::debug;

use super::error::FfiResult;
use super::plan::CallPlan;
use super::types::{Signature, TypeClass};
use crate::arch::Abi;

/// Cache key: parameter classes, return class, generic-path flag
type ShapeKey = (Vec<TypeClass>, TypeClass, bool);

/// Compute an uncached plan for any ABI
pub fn plan(params: &[TypeClass], ret: TypeClass, abi: Abi) -> FfiResult<CallPlan> {
    abi.convention().plan(params, ret, false)
}

/// Signature registry - plan cache for one ABI
pub struct SignatureRegistry {
    abi: Abi,
    plans: RwLock<HashMap<ShapeKey, Arc<CallPlan>>>,
}

static NATIVE: OnceCell<SignatureRegistry> = OnceCell::new();

impl SignatureRegistry {
    /// Create an empty registry for `abi`
    pub fn new(abi: Abi) -> Self {
        Self {
            abi,
            plans: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide registry for the host ABI
    pub fn native() -> FfiResult<&'static SignatureRegistry> {
        let abi = Abi::require_native()?;
        Ok(NATIVE.get_or_init(|| SignatureRegistry::new(abi)))
    }

    /// Target ABI of every plan in this registry
    pub fn abi(&self) -> Abi {
        self.abi
    }

    /// Plan a fixed-arity shape
    pub fn plan(&self, params: &[TypeClass], ret: TypeClass) -> FfiResult<Arc<CallPlan>> {
        self.lookup(params, ret, false)
    }

    /// Plan a signature
    pub fn plan_signature(&self, signature: &Signature) -> FfiResult<Arc<CallPlan>> {
        self.lookup(&signature.params, signature.ret, false)
    }

    /// Plan a call made through the generic path.
    ///
    /// Every argument not declared floating is placed as a full integer
    /// word; the slots keep their declared classes for marshaling.
    pub fn plan_variadic(&self, params: &[TypeClass], ret: TypeClass) -> FfiResult<Arc<CallPlan>> {
        self.lookup(params, ret, true)
    }

    /// Plan for `arity` machine-word arguments returning a machine word
    pub fn plan_words(&self, arity: usize) -> FfiResult<Arc<CallPlan>> {
        self.plan_variadic(&vec![TypeClass::U64; arity], TypeClass::U64)
    }

    /// Number of cached plans
    pub fn len(&self) -> usize {
        self.plans.read().len()
    }

    /// Check if nothing has been planned yet
    pub fn is_empty(&self) -> bool {
        self.plans.read().is_empty()
    }

    fn lookup(&self, params: &[TypeClass], ret: TypeClass, variadic: bool) -> FfiResult<Arc<CallPlan>> {
        let key: ShapeKey = (params.to_vec(), ret, variadic);
        if let Some(plan) = self.plans.read().get(&key) {
            return Ok(Arc::clone(plan));
        }

        let plan = Arc::new(self.abi.convention().plan(params, ret, variadic)?);
        debug!(
            abi = %self.abi,
            signature = %plan.signature(),
            variadic,
            "planned new call shape"
        );

        let mut plans = self.plans.write();
        Ok(Arc::clone(plans.entry(key).or_insert(plan)))
    }
}

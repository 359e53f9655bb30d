//! FFI Type System
//!
//! `TypeClass` says how a single value travels across the native boundary,
//! `Value` is the host-side representation of one such value, and
//! `Signature` is an ordered parameter list plus a return class.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transmission kind of a single parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeClass {
    /// No value (return position only)
    Void,
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 8-bit unsigned integer
    U8,
    /// 16-bit unsigned integer
    U16,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit unsigned integer
    U64,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
    /// Pointer-sized opaque handle
    Pointer,
    /// Pointer to a NUL-terminated byte string
    CString,
    /// Boolean; only the least significant byte is meaningful
    Bool,
}

impl TypeClass {
    /// Size in bytes of the value itself (not of the slot carrying it)
    pub fn size(&self) -> usize {
        match self {
            TypeClass::Void => 0,
            TypeClass::I8 | TypeClass::U8 | TypeClass::Bool => 1,
            TypeClass::I16 | TypeClass::U16 => 2,
            TypeClass::I32 | TypeClass::U32 | TypeClass::F32 => 4,
            TypeClass::I64 | TypeClass::U64 | TypeClass::F64 => 8,
            TypeClass::Pointer | TypeClass::CString => std::mem::size_of::<usize>(),
        }
    }

    /// Check if this is an integer class
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            TypeClass::I8
                | TypeClass::I16
                | TypeClass::I32
                | TypeClass::I64
                | TypeClass::U8
                | TypeClass::U16
                | TypeClass::U32
                | TypeClass::U64
        )
    }

    /// Check if this is a signed integer class
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            TypeClass::I8 | TypeClass::I16 | TypeClass::I32 | TypeClass::I64
        )
    }

    /// Check if this is a floating point class
    pub fn is_float(&self) -> bool {
        matches!(self, TypeClass::F32 | TypeClass::F64)
    }

    /// Check if this is a pointer class
    pub fn is_pointer(&self) -> bool {
        matches!(self, TypeClass::Pointer | TypeClass::CString)
    }

    /// Everything except floats and void travels in general purpose registers.
    pub fn uses_int_register(&self) -> bool {
        !self.is_float() && *self != TypeClass::Void
    }

    /// Full machine-word class a value of this class is promoted to on the
    /// generic call path. Floats and pointer-sized classes are unchanged.
    pub fn word_class(&self) -> TypeClass {
        match self {
            TypeClass::I8 | TypeClass::I16 | TypeClass::I32 => TypeClass::I64,
            TypeClass::U8 | TypeClass::U16 | TypeClass::U32 | TypeClass::Bool => TypeClass::U64,
            other => *other,
        }
    }

    /// Canonical short name, also accepted by `from_str`
    pub fn name(&self) -> &'static str {
        match self {
            TypeClass::Void => "void",
            TypeClass::I8 => "i8",
            TypeClass::I16 => "i16",
            TypeClass::I32 => "i32",
            TypeClass::I64 => "i64",
            TypeClass::U8 => "u8",
            TypeClass::U16 => "u16",
            TypeClass::U32 => "u32",
            TypeClass::U64 => "u64",
            TypeClass::F32 => "f32",
            TypeClass::F64 => "f64",
            TypeClass::Pointer => "ptr",
            TypeClass::CString => "cstr",
            TypeClass::Bool => "bool",
        }
    }
}

impl FromStr for TypeClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let class = match normalized.as_str() {
            "void" => TypeClass::Void,
            "i8" | "int8" | "int8_t" | "char" | "signed char" => TypeClass::I8,
            "i16" | "int16" | "int16_t" | "short" => TypeClass::I16,
            "i32" | "int32" | "int32_t" | "int" => TypeClass::I32,
            "i64" | "int64" | "int64_t" | "long" | "long long" | "ssize_t" | "isize" => {
                TypeClass::I64
            }
            "u8" | "uint8" | "uint8_t" | "byte" | "unsigned char" => TypeClass::U8,
            "u16" | "uint16" | "uint16_t" | "unsigned short" => TypeClass::U16,
            "u32" | "uint32" | "uint32_t" | "unsigned" | "unsigned int" => TypeClass::U32,
            "u64" | "uint64" | "uint64_t" | "unsigned long" | "size_t" | "usize" => TypeClass::U64,
            "f32" | "float" => TypeClass::F32,
            "f64" | "double" => TypeClass::F64,
            "ptr" | "pointer" | "void*" | "const void*" | "uintptr" | "uintptr_t" => {
                TypeClass::Pointer
            }
            "cstr" | "string" | "char*" | "const char*" => TypeClass::CString,
            "bool" | "_bool" => TypeClass::Bool,
            // Any other pointer type is passed as an address
            other if other.ends_with('*') => TypeClass::Pointer,
            other => return Err(format!("unknown type '{}'", other)),
        };
        Ok(class)
    }
}

impl fmt::Display for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// A host-level value passed to or returned from native code
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value
    Void,
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Raw address
    Pointer(usize),
    /// Owned string; marshaled as a NUL-terminated copy
    String(String),
    Bool(bool),
}

impl Value {
    /// Short name of the variant, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Pointer(_) => "ptr",
            Value::String(_) => "string",
            Value::Bool(_) => "bool",
        }
    }

    /// Integer-like payload as a 64-bit word (signed values sign-extended).
    ///
    /// Returns `None` for floats, strings, booleans and void.
    pub fn int_bits(&self) -> Option<u64> {
        match *self {
            Value::I8(v) => Some(v as i64 as u64),
            Value::I16(v) => Some(v as i64 as u64),
            Value::I32(v) => Some(v as i64 as u64),
            Value::I64(v) => Some(v as u64),
            Value::U8(v) => Some(v as u64),
            Value::U16(v) => Some(v as u64),
            Value::U32(v) => Some(v as u64),
            Value::U64(v) => Some(v),
            Value::Pointer(v) => Some(v as u64),
            _ => None,
        }
    }

    /// Floating payload widened to f64
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Check if this is a void value
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// Parse a command-line literal as a value of `class`.
    ///
    /// Integers and pointers accept decimal or `0x` hex; strings are taken
    /// verbatim.
    pub fn parse_literal(class: TypeClass, text: &str) -> Result<Self, String> {
        let bad = |e: &dyn fmt::Display| format!("invalid {} literal '{}': {}", class, text, e);
        let int = || -> Result<i128, String> {
            let t = text.trim();
            let (neg, digits) = match t.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, t),
            };
            let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
                Some(hex) => i128::from_str_radix(hex, 16),
                None => digits.parse::<i128>(),
            }
            .map_err(|e| bad(&e))?;
            Ok(if neg { -magnitude } else { magnitude })
        };
        let value = match class {
            TypeClass::Void => return Err(format!("void takes no literal, got '{}'", text)),
            TypeClass::I8 => Value::I8(int()?.try_into().map_err(|e| bad(&e))?),
            TypeClass::I16 => Value::I16(int()?.try_into().map_err(|e| bad(&e))?),
            TypeClass::I32 => Value::I32(int()?.try_into().map_err(|e| bad(&e))?),
            TypeClass::I64 => Value::I64(int()?.try_into().map_err(|e| bad(&e))?),
            TypeClass::U8 => Value::U8(int()?.try_into().map_err(|e| bad(&e))?),
            TypeClass::U16 => Value::U16(int()?.try_into().map_err(|e| bad(&e))?),
            TypeClass::U32 => Value::U32(int()?.try_into().map_err(|e| bad(&e))?),
            TypeClass::U64 => Value::U64(int()?.try_into().map_err(|e| bad(&e))?),
            TypeClass::F32 => Value::F32(text.trim().parse().map_err(|e| bad(&e))?),
            TypeClass::F64 => Value::F64(text.trim().parse().map_err(|e| bad(&e))?),
            TypeClass::Pointer => match text.trim() {
                "null" | "NULL" => Value::Pointer(0),
                _ => Value::Pointer(int()?.try_into().map_err(|e| bad(&e))?),
            },
            TypeClass::CString => Value::String(text.to_string()),
            TypeClass::Bool => match text.trim() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => return Err(bad(&"expected true or false")),
            },
        };
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "()"),
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Pointer(p) => write!(f, "{:#x}", p),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64, bool => Bool, String => String,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Void
    }
}

impl<T> From<*const T> for Value {
    fn from(v: *const T) -> Self {
        Value::Pointer(v as usize)
    }
}

impl<T> From<*mut T> for Value {
    fn from(v: *mut T) -> Self {
        Value::Pointer(v as usize)
    }
}

/// Rust types with a fixed transmission class.
///
/// `from_value` is a C-style coercion: the declared plan already fixes the
/// class, so a mismatched variant is converted rather than rejected.
pub trait NativeType: Sized {
    const CLASS: TypeClass;

    fn into_value(self) -> Value;

    fn from_value(value: &Value) -> Self;
}

macro_rules! native_int {
    ($($ty:ty => $class:ident),* $(,)?) => {
        $(
            impl NativeType for $ty {
                const CLASS: TypeClass = TypeClass::$class;

                fn into_value(self) -> Value {
                    Value::$class(self)
                }

                fn from_value(value: &Value) -> Self {
                    match value {
                        Value::Bool(b) => *b as $ty,
                        Value::F32(_) | Value::F64(_) => value.as_f64().unwrap_or_default() as $ty,
                        other => other.int_bits().unwrap_or_default() as $ty,
                    }
                }
            }
        )*
    };
}

native_int! {
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
}

impl NativeType for isize {
    const CLASS: TypeClass = TypeClass::I64;

    fn into_value(self) -> Value {
        Value::I64(self as i64)
    }

    fn from_value(value: &Value) -> Self {
        i64::from_value(value) as isize
    }
}

impl NativeType for usize {
    const CLASS: TypeClass = TypeClass::Pointer;

    fn into_value(self) -> Value {
        Value::Pointer(self)
    }

    fn from_value(value: &Value) -> Self {
        u64::from_value(value) as usize
    }
}

impl NativeType for f32 {
    const CLASS: TypeClass = TypeClass::F32;

    fn into_value(self) -> Value {
        Value::F32(self)
    }

    fn from_value(value: &Value) -> Self {
        match value {
            Value::F32(v) => *v,
            other => other.as_f64().unwrap_or_default() as f32,
        }
    }
}

impl NativeType for f64 {
    const CLASS: TypeClass = TypeClass::F64;

    fn into_value(self) -> Value {
        Value::F64(self)
    }

    fn from_value(value: &Value) -> Self {
        value.as_f64().unwrap_or_default()
    }
}

impl NativeType for bool {
    const CLASS: TypeClass = TypeClass::Bool;

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: &Value) -> Self {
        match value {
            Value::Bool(b) => *b,
            other => other.int_bits().is_some_and(|bits| bits as u8 != 0),
        }
    }
}

impl NativeType for String {
    const CLASS: TypeClass = TypeClass::CString;

    fn into_value(self) -> Value {
        Value::String(self)
    }

    fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => s.clone(),
            _ => String::new(),
        }
    }
}

impl NativeType for () {
    const CLASS: TypeClass = TypeClass::Void;

    fn into_value(self) -> Value {
        Value::Void
    }

    fn from_value(_: &Value) -> Self {}
}

impl<T> NativeType for *const T {
    const CLASS: TypeClass = TypeClass::Pointer;

    fn into_value(self) -> Value {
        Value::Pointer(self as usize)
    }

    fn from_value(value: &Value) -> Self {
        usize::from_value(value) as *const T
    }
}

impl<T> NativeType for *mut T {
    const CLASS: TypeClass = TypeClass::Pointer;

    fn into_value(self) -> Value {
        Value::Pointer(self as usize)
    }

    fn from_value(value: &Value) -> Self {
        usize::from_value(value) as *mut T
    }
}

/// Ordered parameter classes plus a return class
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<TypeClass>,
    pub ret: TypeClass,
}

impl Signature {
    /// Create a new signature
    pub fn new(params: Vec<TypeClass>, ret: TypeClass) -> Self {
        Self { params, ret }
    }

    /// Validate argument count
    pub fn validate_args(&self, arg_count: usize) -> bool {
        arg_count == self.params.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// A named C-style function declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub signature: Signature,
}

impl Declaration {
    /// Parse from a C-style declaration string
    ///
    /// Format: `return_type function_name(param1_type [name], ...)`
    pub fn parse(declaration: &str) -> Result<Self, String> {
        // "char *s" and "char* s" mean the same thing
        let declaration = declaration.trim().trim_end_matches(';').replace(" *", "* ");

        let open = declaration
            .find('(')
            .ok_or_else(|| format!("missing '(' in '{}'", declaration))?;
        let close = declaration
            .rfind(')')
            .ok_or_else(|| format!("missing ')' in '{}'", declaration))?;
        if close < open {
            return Err(format!("malformed parameter list in '{}'", declaration));
        }

        let head = declaration[..open].trim();
        let (ret_str, name) = head
            .rsplit_once(char::is_whitespace)
            .ok_or_else(|| format!("missing return type in '{}'", head))?;
        let ret = ret_str.parse::<TypeClass>()?;

        let mut params = Vec::new();
        let list = declaration[open + 1..close].trim();
        if !list.is_empty() && list != "void" {
            for param in list.split(',') {
                params.push(parse_param(param.trim())?);
            }
        }

        Ok(Self {
            name: name.trim().to_string(),
            signature: Signature::new(params, ret),
        })
    }
}

/// A parameter is either a bare type or a type followed by a name.
fn parse_param(param: &str) -> Result<TypeClass, String> {
    if let Ok(class) = param.parse::<TypeClass>() {
        return Ok(class);
    }
    match param.rsplit_once(char::is_whitespace) {
        // "char* *end" after normalization
        Some((_, name)) if name.starts_with('*') => Ok(TypeClass::Pointer),
        Some((ty, _name)) => ty.parse::<TypeClass>(),
        None => Err(format!("unknown parameter type '{}'", param)),
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.signature.ret, self.name)?;
        for (i, param) in self.signature.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")")
    }
}

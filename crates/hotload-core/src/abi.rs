//! The C ABI every compiled artifact exports.
//!
//! The driver appends a generated shim to each unit (see
//! `compile::shim`); the loader talks to the artifact only through the
//! symbols below.
//!
//! ```text
//! __hotload_manifest(out_ptr, out_len)              static JSON Manifest
//! __hotload_new() -> *mut c_void                     Box<T> via Default, or null
//! __hotload_drop(instance)                           drops the Box<T>
//! __hotload_invoke(instance, op, args_ptr, args_len,
//!                  out_ptr, out_len) -> i32          InvokeStatus
//! __hotload_free(ptr, len)                           releases an out buffer
//! ```
//!
//! Arguments travel as a sequence of `u64` little-endian length prefixed
//! UTF-8 strings. Output is a UTF-8 buffer owned by the artifact until it is
//! handed back to `__hotload_free`.

use std::ffi::c_void;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Bumped whenever the symbol set or the encodings change.
pub const ABI_VERSION: u32 = 1;

pub const MANIFEST_SYMBOL: &[u8] = b"__hotload_manifest";
pub const NEW_SYMBOL: &[u8] = b"__hotload_new";
pub const DROP_SYMBOL: &[u8] = b"__hotload_drop";
pub const INVOKE_SYMBOL: &[u8] = b"__hotload_invoke";
pub const FREE_SYMBOL: &[u8] = b"__hotload_free";

pub type ManifestFn = unsafe extern "C" fn(*mut *const u8, *mut usize);
pub type NewFn = unsafe extern "C" fn() -> *mut c_void;
pub type DropFn = unsafe extern "C" fn(*mut c_void);
pub type InvokeFn = unsafe extern "C" fn(
    *mut c_void,
    usize,
    *const u8, usize,  // arguments
    *mut *mut u8, *mut usize,  // output
) -> i32;
pub type FreeFn = unsafe extern "C" fn(*mut u8, usize);

/// Status code returned by `__hotload_invoke`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum InvokeStatus {
    /// Output holds the rendered return value
    Success = 0,
    /// Wrong argument count or an argument failed to parse
    BadArguments = -1,
    /// Operation index out of range
    UnknownOperation = -2,
    /// Operation needs a receiver but was called without an instance
    MissingInstance = -3,
    /// The operation panicked; output holds the panic message
    Panic = -4,
}

impl From<i32> for InvokeStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Success,
            -1 => Self::BadArguments,
            -2 => Self::UnknownOperation,
            -3 => Self::MissingInstance,
            _ => Self::Panic,
        }
    }
}

/// Self-description embedded in every artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub abi: u32,
    pub type_name: String,
    pub operations: Vec<Operation>,
}

/// How an operation takes its receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Receiver {
    /// Associated function, callable without an instance
    None,
    Ref,
    RefMut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: String,
}

/// One invocable operation declared on the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub receiver: Receiver,
    pub params: Vec<Param>,
    /// Return type as written, `None` for `()`
    pub returns: Option<String>,
}

impl Operation {
    /// Rendered signature, e.g. `fn greet(&self, name: &str) -> String`.
    pub fn signature(&self) -> String {
        let mut params: Vec<String> = Vec::with_capacity(self.params.len() + 1);
        match self.receiver {
            Receiver::None => {}
            Receiver::Ref => params.push("&self".to_string()),
            Receiver::RefMut => params.push("&mut self".to_string()),
        }
        params.extend(self.params.iter().map(|p| format!("{}: {}", p.name, p.ty)));

        match &self.returns {
            Some(ret) => format!("fn {}({}) -> {}", self.name, params.join(", "), ret),
            None => format!("fn {}({})", self.name, params.join(", ")),
        }
    }

    pub fn needs_instance(&self) -> bool {
        self.receiver != Receiver::None
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// Encode invocation arguments for `__hotload_invoke`.
pub fn encode_args(args: &[&str]) -> Vec<u8> {
    let total: usize = args.iter().map(|a| 8 + a.len()).sum();
    let mut buf = Vec::with_capacity(total);
    for arg in args {
        buf.extend_from_slice(&(arg.len() as u64).to_le_bytes());
        buf.extend_from_slice(arg.as_bytes());
    }
    buf
}

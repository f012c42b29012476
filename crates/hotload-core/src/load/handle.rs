//! Loaded types and their instances.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use super::library::LoadedLibrary;
use crate::abi::{
    ABI_VERSION, DROP_SYMBOL, DropFn, FREE_SYMBOL, FreeFn, INVOKE_SYMBOL, InvokeFn, InvokeStatus,
    MANIFEST_SYMBOL, Manifest, ManifestFn, NEW_SYMBOL, NewFn, Operation, encode_args,
};
use crate::error::{Error, Result};

/// A type materialized from an artifact.
///
/// The function pointers are only valid while `library` is open; both live
/// and die together here.
pub(crate) struct LoadedType {
    manifest: Manifest,
    new_fn: NewFn,
    drop_fn: DropFn,
    invoke_fn: InvokeFn,
    free_fn: FreeFn,
    library: LoadedLibrary,
}

impl LoadedType {
    /// Open `bytes` and check they define `name`.
    pub(crate) fn load(name: &str, bytes: &[u8]) -> Result<Self> {
        let library = unsafe { LoadedLibrary::open(name, bytes)? };

        let manifest_fn: ManifestFn = symbol(&library, name, MANIFEST_SYMBOL)?;
        let new_fn: NewFn = symbol(&library, name, NEW_SYMBOL)?;
        let drop_fn: DropFn = symbol(&library, name, DROP_SYMBOL)?;
        let invoke_fn: InvokeFn = symbol(&library, name, INVOKE_SYMBOL)?;
        let free_fn: FreeFn = symbol(&library, name, FREE_SYMBOL)?;

        let manifest = read_manifest(name, manifest_fn)?;
        if manifest.abi != ABI_VERSION {
            return Err(Error::InvalidArtifact {
                name: name.to_string(),
                reason: format!("ABI version {} (expected {})", manifest.abi, ABI_VERSION),
            });
        }
        if manifest.type_name != name {
            return Err(Error::InvalidArtifact {
                name: name.to_string(),
                reason: format!("artifact defines `{}`", manifest.type_name),
            });
        }

        Ok(Self {
            manifest,
            new_fn,
            drop_fn,
            invoke_fn,
            free_fn,
            library,
        })
    }

    fn call(&self, instance: *mut c_void, operation: &str, args: &[&str]) -> Result<String> {
        let (index, op) = self
            .manifest
            .operations
            .iter()
            .enumerate()
            .find(|(_, op)| op.name == operation)
            .ok_or_else(|| Error::UnknownOperation {
                type_name: self.manifest.type_name.clone(),
                operation: operation.to_string(),
            })?;

        let invocation_error = |message: String| Error::Invocation {
            type_name: self.manifest.type_name.clone(),
            operation: operation.to_string(),
            message,
        };

        if op.needs_instance() && instance.is_null() {
            return Err(invocation_error(format!("`{}` needs an instance", op)));
        }

        let encoded = encode_args(args);
        let mut out_ptr: *mut u8 = std::ptr::null_mut();
        let mut out_len: usize = 0;

        let code = unsafe {
            (self.invoke_fn)(
                instance,
                index,
                encoded.as_ptr(),
                encoded.len(),
                &mut out_ptr,
                &mut out_len,
            )
        };

        let output = OutputBuffer {
            ptr: out_ptr,
            len: out_len,
            free_fn: self.free_fn,
        };
        let text = output.text();

        match InvokeStatus::from(code) {
            InvokeStatus::Success => Ok(text),
            InvokeStatus::UnknownOperation => Err(Error::UnknownOperation {
                type_name: self.manifest.type_name.clone(),
                operation: operation.to_string(),
            }),
            InvokeStatus::Panic => Err(invocation_error(format!("panicked: {}", text))),
            InvokeStatus::BadArguments | InvokeStatus::MissingInstance => {
                Err(invocation_error(text))
            }
        }
    }
}

fn symbol<T: Copy>(library: &LoadedLibrary, name: &str, symbol: &[u8]) -> Result<T> {
    unsafe { library.library().get::<T>(symbol) }
        .map(|s| *s)
        .map_err(|e| Error::InvalidArtifact {
            name: name.to_string(),
            reason: format!(
                "missing symbol {}: {}",
                String::from_utf8_lossy(symbol),
                e
            ),
        })
}

fn read_manifest(name: &str, manifest_fn: ManifestFn) -> Result<Manifest> {
    let mut ptr: *const u8 = std::ptr::null();
    let mut len: usize = 0;
    unsafe { manifest_fn(&mut ptr, &mut len) };

    if ptr.is_null() {
        return Err(Error::InvalidArtifact {
            name: name.to_string(),
            reason: "empty manifest".to_string(),
        });
    }

    // static data inside the library, copied out by parsing
    let json = unsafe { std::slice::from_raw_parts(ptr, len) };
    serde_json::from_slice(json).map_err(|e| Error::InvalidArtifact {
        name: name.to_string(),
        reason: format!("unreadable manifest: {}", e),
    })
}

/// Output buffer owned by the artifact, handed back on drop.
struct OutputBuffer {
    ptr: *mut u8,
    len: usize,
    free_fn: FreeFn,
}

impl OutputBuffer {
    fn text(&self) -> String {
        if self.ptr.is_null() {
            return String::new();
        }
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr, self.len) };
        String::from_utf8_lossy(bytes).into_owned()
    }
}

impl Drop for OutputBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { (self.free_fn)(self.ptr, self.len) };
        }
    }
}

/// Shared handle to a loaded type.
///
/// Clones point at the same loaded definition; see [`TypeHandle::ptr_eq`].
#[derive(Clone)]
pub struct TypeHandle {
    inner: Arc<LoadedType>,
}

impl TypeHandle {
    pub(crate) fn new(loaded: LoadedType) -> Self {
        Self {
            inner: Arc::new(loaded),
        }
    }

    /// Fully-qualified name, e.g. `p::Greeter`.
    pub fn name(&self) -> &str {
        &self.inner.manifest.type_name
    }

    pub fn manifest(&self) -> &Manifest {
        &self.inner.manifest
    }

    /// Operations callable through this handle or its instances.
    pub fn operations(&self) -> &[Operation] {
        &self.inner.manifest.operations
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations().iter().find(|op| op.name == name)
    }

    /// Create an instance with the type's `Default` constructor.
    pub fn instantiate(&self) -> Result<Instance> {
        let raw = unsafe { (self.inner.new_fn)() };
        let ptr = NonNull::new(raw).ok_or_else(|| Error::NotInstantiable(self.name().to_string()))?;
        Ok(Instance {
            ty: Arc::clone(&self.inner),
            ptr,
        })
    }

    /// Call an operation that takes no receiver.
    pub fn invoke_static(&self, operation: &str, args: &[&str]) -> Result<String> {
        self.inner.call(std::ptr::null_mut(), operation, args)
    }

    /// Whether both handles come from the same materialization.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHandle")
            .field("name", &self.name())
            .field("operations", &self.operations().len())
            .field("library", &self.inner.library)
            .finish()
    }
}

/// A live value of a loaded type. Dropping it runs the type's destructor.
pub struct Instance {
    ty: Arc<LoadedType>,
    ptr: NonNull<c_void>,
}

impl Instance {
    pub fn type_name(&self) -> &str {
        &self.ty.manifest.type_name
    }

    pub fn type_handle(&self) -> TypeHandle {
        TypeHandle {
            inner: Arc::clone(&self.ty),
        }
    }

    /// Call `operation` with text arguments, returning the rendered result.
    pub fn invoke(&mut self, operation: &str, args: &[&str]) -> Result<String> {
        self.ty.call(self.ptr.as_ptr(), operation, args)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.type_name())
            .field("ptr", &self.ptr)
            .finish()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe { (self.ty.drop_fn)(self.ptr.as_ptr()) };
    }
}

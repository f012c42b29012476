//! Dispatch shim generation.
//!
//! A unit is compiled together with a generated module that exports the
//! artifact ABI (see [`crate::abi`]). The shim is derived from the unit with
//! `syn`: the declared type becomes `Target`, and every public inherent
//! method whose parameters can be parsed from text becomes an operation.
//!
//! The shim is a child module of the module that declares the type, so it
//! can name private types. For types at the crate root it is appended after
//! the source; for types in inline modules it is spliced, on one line, in
//! front of the innermost module's closing brace.
//!
//! Whether `Target` implements `Default`, `Display` or `Debug` is not known
//! at generation time, so those are selected with autoref-based
//! specialization inside the generated code.

use proc_macro2::{Ident, LineColumn, Span, TokenStream};
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{
    FnArg, GenericParam, ImplItem, ImplItemFn, Item, Pat, PathArguments, ReturnType, Type,
    Visibility,
};

use super::types::CompilationUnit;
use crate::abi::{ABI_VERSION, Manifest, Operation, Param, Receiver};
use crate::error::{Error, Result};

/// Parameter types an operation may take: they all implement `FromStr`.
const PARSABLE_TYPES: &[&str] = &[
    "bool", "char", "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32", "u64",
    "u128", "usize", "f32", "f64", "String",
];

/// Generated shim for one unit.
#[derive(Debug, Clone)]
pub struct Shim {
    manifest: Manifest,
    instantiable: bool,
    code: String,
    /// Closing brace of the declaring module, when the type is nested.
    anchor: Option<LineColumn>,
}

/// Where the shim goes inside the combined source, in rustc's terms:
/// 1-based line and column, width in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineRegion {
    pub line: usize,
    pub column: usize,
    pub width: usize,
}

#[derive(Default)]
struct Analysis {
    found: bool,
    generic: bool,
    methods: Vec<MethodPlan>,
    anchor: Option<LineColumn>,
}

#[derive(Debug, Clone)]
enum ArgKind {
    Str,
    Owned(Type),
    Ref(Type),
    RefMut(Type),
}

#[derive(Debug, Clone)]
struct MethodPlan {
    ident: Ident,
    operation: Operation,
    args: Vec<ArgKind>,
}

impl Shim {
    /// Analyse the unit and generate its shim.
    ///
    /// Source that `syn` cannot parse still gets a shim (with no operations);
    /// the toolchain will report the syntax error.
    pub fn generate(unit: &CompilationUnit) -> Result<Self> {
        let analysis = match syn::parse_file(unit.source()) {
            Ok(file) => analyse(&file.items, unit.name()),
            Err(e) => {
                tracing::debug!("Shim analysis skipped for {}: {}", unit.name(), e);
                Analysis::default()
            }
        };

        let instantiable = analysis.found && !analysis.generic;
        let (methods, anchor) = if instantiable {
            (analysis.methods, analysis.anchor)
        } else {
            (Vec::new(), None)
        };

        let manifest = Manifest {
            abi: ABI_VERSION,
            type_name: unit.name().to_string(),
            operations: methods.iter().map(|m| m.operation.clone()).collect(),
        };
        let manifest_json =
            serde_json::to_string(&manifest).map_err(|e| Error::Serialization(e.to_string()))?;

        let code = render(unit.name(), instantiable, &methods, &manifest_json).to_string();

        Ok(Self {
            manifest,
            instantiable,
            code,
            anchor,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Whether the declared type was found and is not generic.
    pub fn is_instantiable(&self) -> bool {
        self.instantiable
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// The unit's source with the shim attached. Lines of the user source
    /// keep their numbers: an appended shim starts on the line after the
    /// last source line, a spliced one shares the closing brace's line.
    pub fn attach_to(&self, source: &str) -> String {
        let mut combined = String::with_capacity(source.len() + self.code.len() + 2);

        if let Some(offset) = self.splice_offset(source) {
            combined.push_str(&source[..offset]);
            combined.push_str(&self.code);
            combined.push(' ');
            combined.push_str(&source[offset..]);
            return combined;
        }

        combined.push_str(source);
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&self.code);
        combined.push('\n');
        combined
    }

    /// The region a spliced shim occupies in [`attach_to`](Self::attach_to)'s
    /// output, `None` when it is appended.
    pub fn inline_region(&self, source: &str) -> Option<InlineRegion> {
        let anchor = self.anchor?;
        self.splice_offset(source)?;
        Some(InlineRegion {
            line: anchor.line,
            column: anchor.column + 1,
            width: self.code.chars().count() + 1,
        })
    }

    fn splice_offset(&self, source: &str) -> Option<usize> {
        let offset = byte_offset(source, self.anchor?)?;
        source[offset..].starts_with('}').then_some(offset)
    }
}

/// Byte offset of a `span-locations` position (1-based line, column in
/// characters) in `source`.
fn byte_offset(source: &str, at: LineColumn) -> Option<usize> {
    if at.line == 0 {
        return None;
    }
    let line_start = if at.line == 1 {
        0
    } else {
        source.match_indices('\n').nth(at.line - 2)?.0 + 1
    };
    let line = source[line_start..].split('\n').next()?;
    let (within, _) = line.char_indices().nth(at.column)?;
    Some(line_start + within)
}

/// Locate the type and collect its operations.
fn analyse(items: &[Item], name: &str) -> Analysis {
    let segments: Vec<&str> = name.split("::").collect();
    let Some((type_name, modules)) = segments.split_last() else {
        return Analysis::default();
    };

    let mut scope = items;
    let mut anchor = None;
    for module in modules {
        let found = scope.iter().find_map(|item| match item {
            Item::Mod(m) if m.ident.unraw() == module => m.content.as_ref(),
            _ => None,
        });
        match found {
            Some((brace, items)) => {
                anchor = Some(brace.span.close().start());
                scope = items.as_slice();
            }
            None => return Analysis::default(),
        }
    }

    let generics = scope.iter().find_map(|item| match item {
        Item::Struct(s) if s.ident.unraw() == type_name => Some(&s.generics),
        Item::Enum(e) if e.ident.unraw() == type_name => Some(&e.generics),
        Item::Union(u) if u.ident.unraw() == type_name => Some(&u.generics),
        _ => None,
    });
    let Some(generics) = generics else {
        return Analysis::default();
    };

    let methods = scope
        .iter()
        .filter_map(|item| match item {
            Item::Impl(imp)
                if imp.trait_.is_none()
                    && imp.generics.params.is_empty()
                    && is_self_type(&imp.self_ty, type_name) =>
            {
                Some(imp.items.iter())
            }
            _ => None,
        })
        .flatten()
        .filter_map(|item| match item {
            ImplItem::Fn(f) => plan_method(f),
            _ => None,
        })
        .collect();

    Analysis {
        found: true,
        generic: !generics.params.is_empty(),
        methods,
        anchor,
    }
}

fn is_self_type(ty: &Type, type_name: &str) -> bool {
    match ty {
        Type::Path(tp) if tp.qself.is_none() => tp.path.segments.last().is_some_and(|seg| {
            seg.ident.unraw() == type_name && matches!(seg.arguments, PathArguments::None)
        }),
        _ => false,
    }
}

fn is_exported(vis: &Visibility) -> bool {
    match vis {
        Visibility::Public(_) => true,
        Visibility::Restricted(r) => r.path.is_ident("crate"),
        Visibility::Inherited => false,
    }
}

fn plan_method(f: &ImplItemFn) -> Option<MethodPlan> {
    let sig = &f.sig;
    if !is_exported(&f.vis)
        || sig.asyncness.is_some()
        || sig.unsafety.is_some()
        || sig.abi.is_some()
        || sig.variadic.is_some()
        || sig
            .generics
            .params
            .iter()
            .any(|p| !matches!(p, GenericParam::Lifetime(_)))
    {
        return None;
    }

    let mut receiver = Receiver::None;
    let mut params = Vec::new();
    let mut args = Vec::new();

    for input in &sig.inputs {
        match input {
            FnArg::Receiver(r) => {
                // `self: Box<Self>` and friends
                if r.colon_token.is_some() {
                    return None;
                }
                receiver = match (&r.reference, &r.mutability) {
                    (Some(_), None) => Receiver::Ref,
                    (Some(_), Some(_)) => Receiver::RefMut,
                    (None, _) => return None,
                };
            }
            FnArg::Typed(pt) => {
                let kind = classify_arg(&pt.ty)?;
                let name = match &*pt.pat {
                    Pat::Ident(pi) => pi.ident.unraw().to_string(),
                    _ => format!("arg{}", params.len()),
                };
                params.push(Param {
                    name,
                    ty: type_string(&pt.ty),
                });
                args.push(kind);
            }
        }
    }

    let returns = match &sig.output {
        ReturnType::Default => None,
        ReturnType::Type(_, ty) => Some(type_string(ty)),
    };

    Some(MethodPlan {
        ident: sig.ident.clone(),
        operation: Operation {
            name: sig.ident.unraw().to_string(),
            receiver,
            params,
            returns,
        },
        args,
    })
}

fn simple_type_name(ty: &Type) -> Option<String> {
    match ty {
        Type::Path(tp) if tp.qself.is_none() && tp.path.segments.len() == 1 => {
            let seg = &tp.path.segments[0];
            matches!(seg.arguments, PathArguments::None).then(|| seg.ident.to_string())
        }
        _ => None,
    }
}

fn classify_arg(ty: &Type) -> Option<ArgKind> {
    match ty {
        Type::Reference(r) => {
            let elem = simple_type_name(&r.elem)?;
            match (elem.as_str(), r.mutability.is_some()) {
                ("str", false) => Some(ArgKind::Str),
                ("str", true) => None,
                (name, mutable) if PARSABLE_TYPES.contains(&name) => {
                    let inner = (*r.elem).clone();
                    Some(if mutable {
                        ArgKind::RefMut(inner)
                    } else {
                        ArgKind::Ref(inner)
                    })
                }
                _ => None,
            }
        }
        other => {
            let name = simple_type_name(other)?;
            PARSABLE_TYPES
                .contains(&name.as_str())
                .then(|| ArgKind::Owned(other.clone()))
        }
    }
}

/// Token-printed type with the spacing people write.
fn type_string(ty: &Type) -> String {
    quote!(#ty)
        .to_string()
        .replace(" :: ", "::")
        .replace(":: ", "::")
        .replace("& ", "&")
        .replace(" <", "<")
        .replace("< ", "<")
        .replace(" >", ">")
        .replace(" ,", ",")
        .replace("( ", "(")
        .replace(" )", ")")
        .replace("[ ", "[")
        .replace(" ]", "]")
        .replace(" ;", ";")
}

fn path_segment(segment: &str) -> Ident {
    syn::parse_str::<Ident>(segment).unwrap_or_else(|_| Ident::new_raw(segment, Span::call_site()))
}

fn render(name: &str, instantiable: bool, methods: &[MethodPlan], manifest_json: &str) -> TokenStream {
    let type_ident = path_segment(name.rsplit("::").next().unwrap_or(name));

    let target_alias = instantiable.then(|| quote! { type Target = super::#type_ident; });

    let make_helpers = instantiable.then(|| {
        quote! {
            struct ShimMake<T>(PhantomData<T>);
            trait ShimViaDefault {
                type Value;
                fn make(&self) -> Option<Self::Value>;
            }
            impl<T: Default> ShimViaDefault for &ShimMake<T> {
                type Value = T;
                fn make(&self) -> Option<T> {
                    Some(T::default())
                }
            }
            trait ShimNoDefault {
                type Value;
                fn make(&self) -> Option<Self::Value>;
            }
            impl<T> ShimNoDefault for ShimMake<T> {
                type Value = T;
                fn make(&self) -> Option<T> {
                    None
                }
            }
        }
    });

    let new_body = if instantiable {
        quote! {
            match catch_unwind(|| (&&ShimMake::<Target>(PhantomData)).make()) {
                Ok(Some(value)) => Box::into_raw(Box::new(value)).cast::<c_void>(),
                _ => std::ptr::null_mut(),
            }
        }
    } else {
        quote! { std::ptr::null_mut() }
    };

    let drop_body = if instantiable {
        quote! {
            if !instance.is_null() {
                let boxed = unsafe { Box::from_raw(instance.cast::<Target>()) };
                let _ = catch_unwind(AssertUnwindSafe(move || drop(boxed)));
            }
        }
    } else {
        quote! { let _ = instance; }
    };

    let arms = methods.iter().enumerate().map(|(index, method)| render_arm(index, method));

    quote! {
        #[doc(hidden)]
        #[allow(dead_code, unused_imports, unused_variables, unused_mut, unused_unsafe, clippy::all)]
        mod __hotload_shim {
            use std::convert::TryInto;
            use std::ffi::c_void;
            use std::marker::PhantomData;
            use std::panic::{catch_unwind, AssertUnwindSafe};

            #target_alias

            static MANIFEST: &str = #manifest_json;

            struct ShimRender<'a, T>(&'a T);
            trait ShimViaDisplay {
                fn render(&self) -> String;
            }
            impl<T: std::fmt::Display> ShimViaDisplay for &&ShimRender<'_, T> {
                fn render(&self) -> String {
                    self.0.to_string()
                }
            }
            trait ShimViaDebug {
                fn render(&self) -> String;
            }
            impl<T: std::fmt::Debug> ShimViaDebug for &ShimRender<'_, T> {
                fn render(&self) -> String {
                    format!("{:?}", self.0)
                }
            }
            trait ShimOpaque {
                fn render(&self) -> String;
            }
            impl<T> ShimOpaque for ShimRender<'_, T> {
                fn render(&self) -> String {
                    String::from("<opaque>")
                }
            }

            #make_helpers

            fn decode_args(mut rest: &[u8]) -> Option<Vec<String>> {
                let mut args = Vec::new();
                while !rest.is_empty() {
                    if rest.len() < 8 {
                        return None;
                    }
                    let (len, tail) = rest.split_at(8);
                    let len = u64::from_le_bytes(len.try_into().ok()?) as usize;
                    if tail.len() < len {
                        return None;
                    }
                    let (arg, tail) = tail.split_at(len);
                    args.push(String::from_utf8(arg.to_vec()).ok()?);
                    rest = tail;
                }
                Some(args)
            }

            unsafe fn emit(text: String, out_ptr: *mut *mut u8, out_len: *mut usize) {
                let bytes = text.into_bytes().into_boxed_slice();
                let len = bytes.len();
                unsafe {
                    *out_ptr = Box::into_raw(bytes).cast::<u8>();
                    *out_len = len;
                }
            }

            fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
                if let Some(s) = payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    String::from("panic with a non-string payload")
                }
            }

            fn dispatch(instance: *mut c_void, op: usize, args: &[String]) -> Result<String, (i32, String)> {
                match op {
                    #(#arms)*
                    _ => Err((-2i32, format!("unknown operation index {}", op))),
                }
            }

            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn __hotload_manifest(out_ptr: *mut *const u8, out_len: *mut usize) {
                unsafe {
                    *out_ptr = MANIFEST.as_ptr();
                    *out_len = MANIFEST.len();
                }
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn __hotload_new() -> *mut c_void {
                #new_body
            }

            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn __hotload_drop(instance: *mut c_void) {
                #drop_body
            }

            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn __hotload_free(ptr: *mut u8, len: usize) {
                if !ptr.is_null() {
                    drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)) });
                }
            }

            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn __hotload_invoke(
                instance: *mut c_void,
                op: usize,
                args_ptr: *const u8,
                args_len: usize,
                out_ptr: *mut *mut u8,
                out_len: *mut usize,
            ) -> i32 {
                let raw: &[u8] = if args_ptr.is_null() || args_len == 0 {
                    &[]
                } else {
                    unsafe { std::slice::from_raw_parts(args_ptr, args_len) }
                };
                let Some(args) = decode_args(raw) else {
                    unsafe { emit(String::from("malformed argument buffer"), out_ptr, out_len) };
                    return -1;
                };
                let (code, text) = match catch_unwind(AssertUnwindSafe(|| dispatch(instance, op, &args))) {
                    Ok(Ok(text)) => (0i32, text),
                    Ok(Err(failure)) => failure,
                    Err(payload) => (-4i32, panic_message(payload)),
                };
                unsafe { emit(text, out_ptr, out_len) };
                code
            }
        }
    }
}

fn render_arm(index: usize, method: &MethodPlan) -> TokenStream {
    let ident = &method.ident;
    let arity = method.args.len();

    let receiver = match method.operation.receiver {
        Receiver::None => None,
        Receiver::Ref => Some(quote! {
            let this: &Target = unsafe { instance.cast::<Target>().as_ref() }
                .ok_or_else(|| (-3i32, String::from("operation requires an instance")))?;
        }),
        Receiver::RefMut => Some(quote! {
            let this: &mut Target = unsafe { instance.cast::<Target>().as_mut() }
                .ok_or_else(|| (-3i32, String::from("operation requires an instance")))?;
        }),
    };

    let mut bindings = Vec::with_capacity(arity);
    let mut call_args = Vec::with_capacity(arity + 1);
    if receiver.is_some() {
        call_args.push(quote! { this });
    }

    for (position, (kind, param)) in method.args.iter().zip(&method.operation.params).enumerate() {
        let var = format_ident!("arg{}", position);
        let (param_name, param_ty) = (&param.name, &param.ty);
        let parse = |ty: &Type, mutable: bool| {
            let binding = if mutable { quote! { mut #var } } else { quote! { #var } };
            quote! {
                let #binding: #ty = args[#position].parse::<#ty>().map_err(|e| {
                    (-1i32, format!("cannot parse argument `{}` as `{}`: {}", #param_name, #param_ty, e))
                })?;
            }
        };

        match kind {
            ArgKind::Str => {
                bindings.push(quote! { let #var: &str = args[#position].as_str(); });
                call_args.push(quote! { #var });
            }
            ArgKind::Owned(ty) => {
                bindings.push(parse(ty, false));
                call_args.push(quote! { #var });
            }
            ArgKind::Ref(ty) => {
                bindings.push(parse(ty, false));
                call_args.push(quote! { &#var });
            }
            ArgKind::RefMut(ty) => {
                bindings.push(parse(ty, true));
                call_args.push(quote! { &mut #var });
            }
        }
    }

    let call = quote! { Target::#ident(#(#call_args),*) };
    let body = if method.operation.returns.is_some() {
        quote! {
            let value = #call;
            Ok((&&&ShimRender(&value)).render())
        }
    } else {
        quote! {
            #call;
            Ok(String::new())
        }
    };

    quote! {
        #index => {
            if args.len() != #arity {
                return Err((-1i32, format!("expected {} argument(s), got {}", #arity, args.len())));
            }
            #receiver
            #(#bindings)*
            #body
        }
    }
}

//! Integration tests for the compile → register → load → invoke path.
//!
//! These tests drive the host `rustc`, which must be on PATH.

use std::time::{Duration, Instant};

use hotload_core::compile::{CompilerOptions, SHIM_FILE};
use hotload_core::{Engine, EngineConfig, Error};

// =============================================================================
// Test Sources
// =============================================================================

const GREETER: &str = r#"
pub mod p {
    #[derive(Default)]
    pub struct Greeter;

    impl Greeter {
        pub fn greet(&self) -> String {
            "hello".to_string()
        }
    }
}
"#;

const CALCULATOR: &str = r#"
#[derive(Default)]
pub struct Calculator {
    total: i64,
}

#[derive(Debug)]
pub struct Pair(pub i64, pub i64);

pub struct Secret;

impl Calculator {
    pub fn sum_to_ten(&self) -> i32 {
        (1..=10).sum()
    }

    pub fn add(&self, a: i64, b: i64) -> i64 {
        a + b
    }

    pub fn accumulate(&mut self, by: i64) -> i64 {
        self.total += by;
        self.total
    }

    pub fn reset(&mut self) {
        self.total = 0;
    }

    pub fn shout(&self, word: &str) -> String {
        word.to_uppercase()
    }

    pub fn pair(&self) -> Pair {
        Pair(1, 2)
    }

    pub fn digits(&self) -> Vec<u8> {
        vec![1, 2, 3]
    }

    pub fn secret(&self) -> Secret {
        Secret
    }

    pub fn boom(&self) -> u32 {
        panic!("boom")
    }

    pub fn name() -> &'static str {
        "calculator"
    }
}
"#;

const NO_DEFAULT: &str = r#"
pub mod cfg {
    pub struct Settings {
        level: u8,
    }

    impl Settings {
        pub fn version() -> u32 {
            3
        }

        pub fn level(&self) -> u8 {
            self.level
        }
    }
}
"#;

const MISSING_BRACE: &str = r#"
pub mod p {
    pub struct Broken;

    impl Broken {
        pub fn value(&self) -> u32 {
            1
        }
}
"#;

const PRIVATE_NESTED: &str = r#"
mod outer {
    mod inner {
        #[derive(Default)]
        struct Counter {
            hits: u32,
        }

        impl Counter {
            pub fn bump(&mut self) -> u32 {
                self.hits += 1;
                self.hits
            }

            pub(crate) fn label() -> &'static str {
                "counter"
            }
        }
    }
}
"#;

const NESTED_TYPE_ERROR: &str = "mod p {\n    pub struct Bad;\n    impl Bad {\n        pub fn f(&self) -> u8 { 300u16 }\n    }\n}\n";

const TYPE_ERROR: &str = "pub struct Typed;\nimpl Typed {\n    pub fn f(&self) -> u32 { \"nope\" }\n}\n";

// =============================================================================
// Round Trips
// =============================================================================

#[test]
fn test_greeter_says_hello() {
    let engine = Engine::default();
    let greeter = engine.compile_and_load(GREETER, None).unwrap();

    assert_eq!(greeter.name(), "p::Greeter");
    assert_eq!(
        greeter.operation("greet").unwrap().signature(),
        "fn greet(&self) -> String"
    );

    let mut instance = greeter.instantiate().unwrap();
    assert_eq!(instance.invoke("greet", &[]).unwrap(), "hello");
}

#[test]
fn test_compile_then_load_separately() {
    let engine = Engine::default();
    let options = CompilerOptions::new().opt_level(1).build();
    let report = engine.compile("Calculator", CALCULATOR, &options).unwrap();

    assert!(!report.artifact.is_empty());
    assert!(engine.namespace().registry().contains("Calculator"));

    let calculator = engine.load("Calculator").unwrap();
    let mut instance = calculator.instantiate().unwrap();
    assert_eq!(instance.invoke("sum_to_ten", &[]).unwrap(), "55");
}

#[test]
fn test_arguments_state_and_rendering() {
    let engine = Engine::default();
    let calculator = engine.compile_and_load(CALCULATOR, None).unwrap();
    let mut calc = calculator.instantiate().unwrap();

    assert_eq!(calc.invoke("add", &["2", "3"]).unwrap(), "5");
    assert_eq!(calc.invoke("accumulate", &["4"]).unwrap(), "4");
    assert_eq!(calc.invoke("accumulate", &["6"]).unwrap(), "10");
    assert_eq!(calc.invoke("reset", &[]).unwrap(), "");
    assert_eq!(calc.invoke("accumulate", &["1"]).unwrap(), "1");
    assert_eq!(calc.invoke("shout", &["hi there"]).unwrap(), "HI THERE");

    // Display, then Debug, then nothing
    assert_eq!(calc.invoke("pair", &[]).unwrap(), "Pair(1, 2)");
    assert_eq!(calc.invoke("digits", &[]).unwrap(), "[1, 2, 3]");
    assert_eq!(calc.invoke("secret", &[]).unwrap(), "<opaque>");

    assert_eq!(calculator.invoke_static("name", &[]).unwrap(), "calculator");
}

#[test]
fn test_invocation_failures() {
    let engine = Engine::default();
    let calculator = engine.compile_and_load(CALCULATOR, None).unwrap();
    let mut calc = calculator.instantiate().unwrap();

    let err = calc.invoke("add", &["two", "3"]).unwrap_err();
    assert!(matches!(err, Error::Invocation { ref message, .. } if message.contains("cannot parse")));

    let err = calc.invoke("add", &["2"]).unwrap_err();
    assert!(matches!(err, Error::Invocation { .. }));

    let err = calc.invoke("subtract", &[]).unwrap_err();
    assert!(matches!(err, Error::UnknownOperation { .. }));

    let err = calc.invoke("boom", &[]).unwrap_err();
    assert!(matches!(err, Error::Invocation { ref message, .. } if message.contains("boom")));

    // the instance survives a caught panic
    assert_eq!(calc.invoke("add", &["1", "1"]).unwrap(), "2");

    let err = calculator.invoke_static("add", &["1", "2"]).unwrap_err();
    assert!(matches!(err, Error::Invocation { .. }));
}

#[test]
fn test_type_without_default_is_not_instantiable() {
    let engine = Engine::default();
    let settings = engine.compile_and_load(NO_DEFAULT, None).unwrap();

    assert_eq!(settings.name(), "cfg::Settings");
    let err = settings.instantiate().unwrap_err();
    assert!(matches!(err, Error::NotInstantiable(ref name) if name == "cfg::Settings"));

    assert_eq!(settings.invoke_static("version", &[]).unwrap(), "3");
    assert!(settings.operation("level").unwrap().needs_instance());
}

#[test]
fn test_private_nested_type_loads() {
    let engine = Engine::default();
    let counter = engine.compile_and_load(PRIVATE_NESTED, None).unwrap();

    assert_eq!(counter.name(), "outer::inner::Counter");
    assert_eq!(counter.invoke_static("label", &[]).unwrap(), "counter");

    let mut instance = counter.instantiate().unwrap();
    assert_eq!(instance.invoke("bump", &[]).unwrap(), "1");
    assert_eq!(instance.invoke("bump", &[]).unwrap(), "2");
}

#[test]
fn test_options_are_honoured() {
    let engine = Engine::default();
    let options = CompilerOptions::new()
        .edition("2018")
        .enable_debug()
        .add_options(["-A", "warnings"])
        .build();

    let greeter = engine.compile_and_load(GREETER, Some(&options)).unwrap();
    assert_eq!(greeter.instantiate().unwrap().invoke("greet", &[]).unwrap(), "hello");
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_missing_brace_is_a_compile_error() {
    let engine = Engine::default();
    let err = engine.compile_and_load(MISSING_BRACE, None).unwrap_err();

    match &err {
        Error::Compile { name, diagnostics } => {
            assert_eq!(name, "p::Broken");
            assert!(!diagnostics.is_empty());
            assert!(!diagnostics[0].message.is_empty());
        }
        other => panic!("expected a compile error, got {other:?}"),
    }

    assert!(engine.namespace().registry().is_empty());
    assert!(matches!(engine.load("p::Broken"), Err(Error::Resolution { .. })));
}

#[test]
fn test_diagnostics_point_into_the_unit() {
    let engine = Engine::default();
    let err = engine.compile_and_load(TYPE_ERROR, None).unwrap_err();

    let error = err
        .diagnostics()
        .iter()
        .find(|d| d.is_error() && d.location.is_some())
        .expect("a located error");
    let location = error.location.as_ref().unwrap();

    assert_eq!(error.code.as_deref(), Some("E0308"));
    assert_eq!(location.file, "memory:///Typed.rs");
    assert_eq!(location.line, 3);
    assert_ne!(location.file, SHIM_FILE);
}

#[test]
fn test_nested_diagnostics_skip_the_spliced_shim() {
    let engine = Engine::default();
    let err = engine.compile_and_load(NESTED_TYPE_ERROR, None).unwrap_err();

    let error = err
        .diagnostics()
        .iter()
        .find(|d| d.is_error() && d.location.is_some())
        .expect("a located error");
    let location = error.location.as_ref().unwrap();

    assert_eq!(location.file, "memory:///p/Bad.rs");
    assert_eq!(location.line, 4);
}

#[test]
fn test_unknown_flag_is_reported() {
    let engine = Engine::default();
    let options = CompilerOptions::new().add_option("--definitely-not-a-flag").build();
    let err = engine.compile_and_load(GREETER, Some(&options)).unwrap_err();

    assert!(matches!(err, Error::Compile { .. }));
    assert!(!err.diagnostics().is_empty());
    assert!(engine.namespace().registry().is_empty());
}

#[test]
fn test_missing_toolchain_is_reported_every_time() {
    let engine = Engine::new(EngineConfig::default().with_rustc("/nonexistent/bin/rustc"));

    for _ in 0..2 {
        let err = engine.compile_and_load(GREETER, None).unwrap_err();
        assert!(matches!(err, Error::ToolchainUnavailable(_)));
        assert!(err.is_fatal());
    }
    assert!(engine.toolchain().is_err());
}

#[cfg(unix)]
#[test]
fn test_deadline_kills_a_hung_compiler() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let fake = dir.path().join("rustc");
    std::fs::write(
        &fake,
        "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo 'rustc 0.0.0-fake'; exit 0; fi\nexec sleep 30\n",
    )
    .unwrap();
    std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

    let engine = Engine::new(
        EngineConfig::default()
            .with_rustc(&fake)
            .with_scratch_root(dir.path().join("scratch")),
    );
    assert_eq!(engine.toolchain().unwrap().version(), "rustc 0.0.0-fake");

    let started = Instant::now();
    let err = engine
        .compile_with_deadline(
            "p::Greeter",
            GREETER,
            &Default::default(),
            Some(Duration::from_millis(300)),
        )
        .unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(engine.namespace().registry().is_empty());

    // scratch areas are cleaned up after a timeout
    let leftovers = std::fs::read_dir(dir.path().join("scratch")).unwrap().count();
    assert_eq!(leftovers, 0);
}

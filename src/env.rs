use std::{cell::RefCell, ffi::OsStr};

#[derive(Clone, Copy)]
struct Env {
    trace_enabled: bool,
    minimal_forced: bool,
}

thread_local! {
    /// Must only be mutated within `set_env`
    static ENV: RefCell<Option<Env>> = const { RefCell::new(None) };
}

/// Read configuration from environment variables. Must be called once, before any getter.
///
/// - `LC3VM_TRACE=1`: print every executed instruction to stderr.
/// - `LC3VM_MINIMAL=1`: behave as if `--minimal` was always given.
pub fn init() {
    let value = Env {
        trace_enabled: var_is("LC3VM_TRACE", "1"),
        minimal_forced: var_is("LC3VM_MINIMAL", "1"),
    };
    set_env(value);
}

pub fn is_trace_enabled() -> bool {
    with_env(|env| env.trace_enabled)
}

pub fn is_minimal_forced() -> bool {
    with_env(|env| env.minimal_forced)
}

fn set_env(value: Env) {
    ENV.with(|env| {
        let mut env = env.borrow_mut();
        assert!(
            env.is_none(),
            "tried to initialize environment state multiple times"
        );
        *env = Some(value);
    });
}

fn with_env<F, R>(callback: F) -> R
where
    F: Fn(&Env) -> R,
{
    ENV.with(|env| {
        let env = env.borrow();
        let env = env.unwrap_or_else(|| {
            panic!("tried to access environment state before initialization");
        });
        callback(&env)
    })
}

fn var_is(name: impl AsRef<OsStr>, value: impl AsRef<str>) -> bool {
    std::env::var(name.as_ref()).is_ok_and(|v| v == value.as_ref())
}

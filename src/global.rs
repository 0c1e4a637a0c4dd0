//! Opt-in single global engine instance, gated behind the `global-instance`
//! feature.
//!
//! The teacher wires capsule instances as `&'static` values once per board;
//! there is no ambient singleton in the teacher itself. This module exists
//! only so glue code that cannot thread a `&mut Context` through an
//! interrupt vector table has somewhere to reach the context from — it is
//! additive scaffolding, not part of the protocol core, and nothing in
//! [`crate::slave`] or [`crate::master`] depends on it.

use core::cell::RefCell;
use critical_section::Mutex;

use crate::context::Context;

static INSTANCE: Mutex<RefCell<Option<Context>>> = Mutex::new(RefCell::new(None));

/// Installs `ctx` as the global instance, replacing any previous one.
/// Typically called once at startup before interrupts are enabled.
pub fn install(ctx: Context) {
    critical_section::with(|cs| {
        INSTANCE.borrow(cs).replace(Some(ctx));
    });
}

/// Runs `f` with exclusive access to the global instance, if one has been
/// installed. Intended for use from ISR vectors, where `critical_section`
/// maps to a brief interrupt-disable on targets without one already active.
pub fn with<R>(f: impl FnOnce(&mut Context) -> R) -> Option<R> {
    critical_section::with(|cs| INSTANCE.borrow(cs).borrow_mut().as_mut().map(f))
}

/// Removes and returns the global instance, if any.
pub fn take() -> Option<Context> {
    critical_section::with(|cs| INSTANCE.borrow(cs).borrow_mut().take())
}

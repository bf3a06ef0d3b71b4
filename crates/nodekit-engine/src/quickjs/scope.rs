//! Per-thread record of entered engine scopes.
//!
//! QuickJS serializes a runtime behind one non-reentrant lock. While a
//! thread holds it, any engine call made from a native callback has to reuse
//! the `Ctx` already on the stack instead of taking the lock again.

use rquickjs::Ctx;
use scopeguard::ScopeGuard;
use std::cell::RefCell;

use crate::types::ContextId;

struct Entered {
    engine: usize,
    context: ContextId,
    ctx: *const (),
}

thread_local! {
    static ENTERED: RefCell<Vec<Entered>> = const { RefCell::new(Vec::new()) };
}

/// What the calling thread holds for one engine
pub(super) enum Active {
    /// The engine lock is not held here
    None,
    /// `context` is entered; the pointer refers to its live `Ctx`
    Context(*const ()),
    /// The lock is held, but only for other contexts
    Other(ContextId),
}

/// Record `ctx` as the innermost scope until the guard drops.
///
/// The guard must not outlive `ctx`.
pub(super) fn push(engine: usize, context: ContextId, ctx: &Ctx<'_>) -> ScopeGuard<(), impl FnOnce(())> {
    let ctx = ctx as *const Ctx<'_> as *const ();
    ENTERED.with(|entered| {
        entered.borrow_mut().push(Entered {
            engine,
            context,
            ctx,
        })
    });
    scopeguard::guard((), |_| {
        ENTERED.with(|entered| {
            entered.borrow_mut().pop();
        })
    })
}

pub(super) fn lookup(engine: usize, context: ContextId) -> Active {
    ENTERED.with(|entered| {
        let entered = entered.borrow();
        let mut other = None;
        for scope in entered.iter().rev().filter(|scope| scope.engine == engine) {
            if scope.context == context {
                return Active::Context(scope.ctx);
            }
            other.get_or_insert(scope.context);
        }
        match other {
            Some(context) => Active::Other(context),
            None => Active::None,
        }
    })
}

/// Whether this thread currently holds the lock of `engine`
pub(super) fn holds(engine: usize) -> bool {
    ENTERED.with(|entered| entered.borrow().iter().any(|scope| scope.engine == engine))
}

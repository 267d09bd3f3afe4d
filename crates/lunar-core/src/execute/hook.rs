//! Per-line execution hook.

use std::cell::Cell;
use std::rc::Rc;
use mlua::{HookTriggers, Lua, VmState};

use crate::events::RunEvents;

use super::token::{Cancelled, CancellationToken};

/// Hook invoked by the interpreter before every executed source line.
///
/// Reports the line to the controller, then checks the cancellation token.
/// A cancelled token makes the hook raise [`Cancelled`] as an interpreter
/// error, which unwinds every Lua frame up to the protected call at the top
/// of the run. The flag stays set, so a script that catches the error with
/// `pcall` is interrupted again on its next line.
pub(crate) struct ExecutionHook {
    token: CancellationToken,
    events: RunEvents,
    tripped: Rc<Cell<bool>>,
}

impl ExecutionHook {
    pub(crate) fn new(token: CancellationToken, events: RunEvents) -> Self {
        Self {
            token,
            events,
            tripped: Rc::new(Cell::new(false)),
        }
    }

    /// Flag that becomes true once the hook has aborted execution.
    pub(crate) fn tripped(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.tripped)
    }

    /// Install the hook on `lua` for every line event.
    pub(crate) fn install(self, lua: &Lua) {
        lua.set_hook(HookTriggers::EVERY_LINE, move |_lua, debug| {
            self.on_line(debug.curr_line())
        });
    }

    fn on_line(&self, line: i32) -> mlua::Result<VmState> {
        if let Ok(line) = u32::try_from(line) {
            self.events.line(line);
        }

        if self.token.is_cancelled() {
            self.tripped.set(true);
            return Err(mlua::Error::external(Cancelled));
        }

        Ok(VmState::Continue)
    }
}

//! Standard output redirection for a worker's interpreter.
//!
//! `print`, `io.write` and `io.stdout` all end up on the run's output
//! channel. Every call is one unbuffered write, so the controller sees
//! output in execution order as soon as the kernel delivers it.

use std::rc::Rc;

use mlua::{AnyUserData, Function, Lua, MultiValue, Table, UserData, UserDataMethods, Value};

use crate::channel::OutputWriter;

/// Replace `print` and the io library's stdout with channel-backed versions.
pub(crate) fn redirect(lua: &Lua, writer: Rc<OutputWriter>) -> mlua::Result<()> {
    let globals = lua.globals();

    let out = Rc::clone(&writer);
    let print = lua.create_function(move |lua, args: MultiValue| {
        let line = format_print_args(lua, args)?;
        out.write_all(&line).map_err(mlua::Error::external)
    })?;
    globals.set("print", print)?;

    let stdout = lua.create_userdata(ScriptStdout { writer })?;
    let io: Table = globals.get("io")?;
    io.set("stdout", stdout.clone())?;

    let write = lua.create_function(move |lua, args: MultiValue| {
        write_values(lua, &stdout, args)?;
        Ok(stdout.clone())
    })?;
    io.set("write", write)?;

    Ok(())
}

/// Render `print` arguments the way the stock `print` does: each value
/// through the current global `tostring`, tab separated, newline terminated.
fn format_print_args(lua: &Lua, args: MultiValue) -> mlua::Result<Vec<u8>> {
    let tostring: Function = lua.globals().get("tostring")?;

    let mut line = Vec::new();
    for (i, value) in args.into_iter().enumerate() {
        if i > 0 {
            line.push(b'\t');
        }
        match tostring.call::<Value>(value)? {
            Value::String(s) => line.extend_from_slice(&s.as_bytes()),
            _ => {
                return Err(mlua::Error::RuntimeError(
                    "'tostring' must return a string to 'print'".to_string(),
                ));
            }
        }
    }
    line.push(b'\n');
    Ok(line)
}

/// Write strings and numbers, like `file:write`.
fn write_values(lua: &Lua, stdout: &AnyUserData, args: MultiValue) -> mlua::Result<()> {
    let this = stdout.borrow::<ScriptStdout>()?;

    let mut bytes = Vec::new();
    for (i, value) in args.into_iter().enumerate() {
        match value {
            Value::String(s) => bytes.extend_from_slice(&s.as_bytes()),
            Value::Integer(_) | Value::Number(_) => {
                let tostring: Function = lua.globals().get("tostring")?;
                let s: mlua::String = tostring.call(value)?;
                bytes.extend_from_slice(&s.as_bytes());
            }
            other => {
                return Err(mlua::Error::RuntimeError(format!(
                    "bad argument #{} to 'write' (string expected, got {})",
                    i + 1,
                    other.type_name()
                )));
            }
        }
    }

    this.writer.write_all(&bytes).map_err(mlua::Error::external)
}

/// Script-visible stand-in for `io.stdout`.
struct ScriptStdout {
    writer: Rc<OutputWriter>,
}

impl UserData for ScriptStdout {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_function("write", |lua, (ud, args): (AnyUserData, MultiValue)| {
            write_values(lua, &ud, args)?;
            Ok(ud)
        });
        methods.add_function("flush", |_, ud: AnyUserData| Ok(ud));
        methods.add_function("setvbuf", |_, _: MultiValue| Ok(true));
        methods.add_function("close", |_, _: MultiValue| {
            Ok((Value::Nil, "cannot close standard file"))
        });
        methods.add_meta_method("__tostring", |_, _, ()| Ok("file (stdout)"));
    }
}

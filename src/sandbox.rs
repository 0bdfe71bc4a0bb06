//! Sandbox Policy - Restricted Lua Namespace
//!
//! Applied once, when an evaluation context is created. Nothing is stripped or
//! re-checked per call.

use std::cell::RefCell;
use std::rc::Rc;

use mlua::{FromLua, Function, Lua, MetaMethod, Table, UserData, UserDataMethods, Value, Variadic};
use tracing::info;

use crate::color::{self, ColorError, ColorValue};
use crate::source::ResourceSpec;

/// Globals granting filesystem, module loading or introspection access
pub const REMOVED_GLOBALS: [&str; 7] = [
    "io", "package", "debug", "dofile", "loadfile", "require", "load",
];

/// The only `os` functions left in place; everything else touches the process
/// or its environment.
pub const OS_ALLOWED: [&str; 4] = ["clock", "date", "difftime", "time"];

/// Resource directives recorded by scripts, drained by the resolver.
pub type ResourceQueue = Rc<RefCell<Vec<ResourceSpec>>>;

pub(crate) fn color_error(err: ColorError) -> mlua::Error {
    mlua::Error::external(err)
}

pub fn restrict(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();

    for name in REMOVED_GLOBALS {
        globals.set(name, Value::Nil)?;
    }

    if let Ok(os) = globals.get::<Table>("os") {
        let keys: Vec<String> = os
            .pairs::<String, Value>()
            .map(|pair| pair.map(|(key, _)| key))
            .collect::<mlua::Result<_>>()?;
        for key in keys {
            if !OS_ALLOWED.contains(&key.as_str()) {
                os.set(key, Value::Nil)?;
            }
        }
    }

    Ok(())
}

/// `print` arguments as the stock Lua `print` would format them
pub(crate) fn print_text(lua: &Lua, args: Variadic<Value>) -> mlua::Result<String> {
    let tostring: Function = lua.globals().get("tostring")?;
    let parts = args
        .into_iter()
        .map(|value| tostring.call::<String>(value))
        .collect::<mlua::Result<Vec<_>>>()?;
    Ok(parts.join("\t"))
}

/// Install the theme functions: `color`, `rgb`, `rgba`, `blend` and `resource`.
/// `print` goes to the log so stdout stays free for the build result.
pub fn register(lua: &Lua, resources: ResourceQueue) -> mlua::Result<()> {
    let globals = lua.globals();

    let func = lua.create_function(|lua, args: Variadic<Value>| {
        info!(target: "script", "{}", print_text(lua, args)?);
        Ok(())
    })?;
    globals.set("print", func)?;

    let func = lua.create_function(|_, (value, channels): (i64, Option<i64>)| {
        ColorValue::from_packed(value, channels).map_err(color_error)
    })?;
    globals.set("color", func)?;

    let func = lua.create_function(|_, (r, g, b): (i64, i64, i64)| {
        ColorValue::rgb(r, g, b).map_err(color_error)
    })?;
    globals.set("rgb", func)?;

    let func = lua.create_function(|_, (r, g, b, a): (i64, i64, i64, i64)| {
        ColorValue::rgba(r, g, b, a).map_err(color_error)
    })?;
    globals.set("rgba", func)?;

    let func = lua.create_function(|_, (mode, fraction): (String, f64)| {
        color::blend(&mode, fraction).map_err(color_error)
    })?;
    globals.set("blend", func)?;

    let func = lua.create_function(move |_, args: Variadic<String>| {
        let spec = match args.as_slice() {
            [pattern] => ResourceSpec {
                prefix: None,
                pattern: pattern.clone(),
            },
            [prefix, pattern] => ResourceSpec {
                prefix: Some(prefix.clone()),
                pattern: pattern.clone(),
            },
            _ => {
                return Err(mlua::Error::runtime(
                    "resource(...) takes a pattern, or a prefix and a pattern",
                ))
            }
        };
        glob::Pattern::new(&spec.pattern).map_err(|err| {
            mlua::Error::runtime(format!("invalid glob pattern `{}`: {}", spec.pattern, err))
        })?;
        resources.borrow_mut().push(spec);
        Ok(())
    })?;
    globals.set("resource", func)?;

    Ok(())
}

impl UserData for ColorValue {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("arr", |_, this, ()| Ok(this.arr()));
        methods.add_method("hex", |_, this, ()| Ok(this.hex()));
        methods.add_method("value", |_, this, ()| Ok(this.packed()));
        methods.add_method("with_alpha", |_, this, alpha: i64| {
            this.with_alpha(alpha).map_err(color_error)
        });
        methods.add_method("negative", |_, this, ()| this.negative().map_err(color_error));
        methods.add_method("to_rgb", |_, this, ()| this.to_rgb().map_err(color_error));

        methods.add_meta_method(MetaMethod::Add, |_, this, other: ColorValue| {
            this.checked_add(&other).map_err(color_error)
        });
        methods.add_meta_method(MetaMethod::Sub, |_, this, other: ColorValue| {
            this.checked_sub(&other).map_err(color_error)
        });
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: ColorValue| Ok(*this == other));
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.to_string()));
    }
}

impl FromLua for ColorValue {
    fn from_lua(value: Value, _: &Lua) -> mlua::Result<Self> {
        match value {
            Value::UserData(ud) => Ok(*ud.borrow::<Self>()?),
            other => Err(mlua::Error::runtime(format!(
                "expected a color, got {}",
                other.type_name()
            ))),
        }
    }
}

//! Expression Engine - Shared Evaluation Context
//!
//! One context lives for one compile. Scripts and inline expressions from every
//! file run against the same sandboxed global namespace, so bindings made by an
//! earlier file are visible to every later one.

use std::path::Path;
use std::rc::Rc;

use mlua::{ChunkMode, Lua, Value};

use crate::color::{ColorError, ColorValue};
use crate::error::{CompileError, Origin};
use crate::sandbox::{self, ResourceQueue};
use crate::source::ResourceSpec;

pub struct EvaluationContext {
    lua: Lua,
    resources: ResourceQueue,
}

impl EvaluationContext {
    /// Create a fresh sandboxed namespace with the theme functions installed.
    pub fn new() -> Result<Self, CompileError> {
        let lua = Lua::new();
        let resources = ResourceQueue::default();

        sandbox::restrict(&lua)
            .and_then(|_| sandbox::register(&lua, Rc::clone(&resources)))
            .map_err(|err| CompileError::ScriptEvaluation {
                origin: Origin::file(Path::new("<sandbox>")),
                message: err.to_string(),
            })?;

        Ok(Self { lua, resources })
    }

    /// Bind a string global before any source file runs.
    pub fn define(&self, name: &str, value: &str) -> Result<(), CompileError> {
        self.lua
            .globals()
            .set(name, value)
            .map_err(|err| script_error(err, &Origin::file(Path::new("<define>"))))
    }

    /// Run a whole script for its side effects.
    pub fn exec(&self, script: &str, origin: &Origin) -> Result<(), CompileError> {
        self.lua
            .load(script)
            .set_name(format!("@{}", origin.file.display()))
            .set_mode(ChunkMode::Text)
            .exec()
            .map_err(|err| script_error(err, origin))
    }

    /// Evaluate one inline expression and print the result.
    ///
    /// Statements are accepted too; they print as the empty string.
    pub fn eval_expr(&self, expr: &str, origin: &Origin) -> Result<String, CompileError> {
        let value: Value = self
            .lua
            .load(expr)
            .set_name(format!("={}", origin))
            .set_mode(ChunkMode::Text)
            .eval()
            .map_err(|err| script_error(err, origin))?;

        render(value, origin)
    }

    /// Resource directives recorded by `resource(...)` since the last call
    pub fn take_resources(&self) -> Vec<ResourceSpec> {
        std::mem::take(&mut *self.resources.borrow_mut())
    }
}

fn render(value: Value, origin: &Origin) -> Result<String, CompileError> {
    match value {
        Value::Nil => Ok(String::new()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Number(n) => format_number(n).ok_or_else(|| CompileError::ScriptEvaluation {
            origin: origin.clone(),
            message: format!("expression evaluated to {} which is not a finite number", n),
        }),
        Value::String(s) => s
            .to_str()
            .map(|s| s.to_string())
            .map_err(|err| script_error(err, origin)),
        Value::UserData(ud) => match ud.borrow::<ColorValue>() {
            Ok(color) => Ok(color.to_string()),
            Err(_) => Err(unprintable("userdata", origin)),
        },
        other => Err(unprintable(other.type_name(), origin)),
    }
}

fn unprintable(type_name: &str, origin: &Origin) -> CompileError {
    CompileError::ScriptEvaluation {
        origin: origin.clone(),
        message: format!("expression evaluated to a {} which cannot be printed", type_name),
    }
}

/// Integral floats print as integer literals. NaN and infinities have no
/// printed form.
fn format_number(n: f64) -> Option<String> {
    if !n.is_finite() {
        None
    } else if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Some((n as i64).to_string())
    } else {
        Some(n.to_string())
    }
}

fn script_error(err: mlua::Error, origin: &Origin) -> CompileError {
    if let Some(source) = find_color_error(&err) {
        return CompileError::Color {
            origin: origin.clone(),
            source,
        };
    }

    let message = err.to_string();
    let mut origin = origin.clone();
    if origin.line.is_none() {
        origin.line = script_line(&message, &origin.file);
    }
    CompileError::ScriptEvaluation { origin, message }
}

fn find_color_error(err: &mlua::Error) -> Option<ColorError> {
    match err {
        mlua::Error::CallbackError { cause, .. } => find_color_error(cause),
        mlua::Error::WithContext { cause, .. } => find_color_error(cause),
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<ColorError>().cloned(),
        _ => None,
    }
}

/// Lua prefixes runtime and syntax errors with `chunk:line:`. Long chunk names
/// are shortened from the left, so match on the file name.
fn script_line(message: &str, file: &Path) -> Option<usize> {
    let name = file.file_name()?.to_str()?;
    let (_, rest) = message.split_once(&format!("{}:", name))?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

use boa_engine::{Context, JsError, JsObject, JsValue, Source, js_string};
use serde_json::Value;

use crate::core::{
    extractor::SourceUnit,
    traits::sandbox::{CompileError, ExecutionLimits, InvokeError, Sandbox, Session},
};

/// Runs solutions inside an embedded JavaScript engine, one fresh realm per
/// session.
#[derive(Clone, Debug, Default)]
pub struct BoaSandbox;

impl BoaSandbox {
    pub fn new() -> Self {
        Self
    }
}

impl Sandbox for BoaSandbox {
    fn open(
        &self,
        unit: &SourceUnit,
        limits: &ExecutionLimits,
    ) -> Result<Box<dyn Session>, CompileError> {
        let session = BoaSession::compile(unit, limits)?;
        Ok(Box::new(session))
    }
}

pub struct BoaSession {
    context: Context,
    entry: JsObject,
    json: JsObject,
    stringify: JsObject,
}

impl BoaSession {
    pub fn compile(unit: &SourceUnit, limits: &ExecutionLimits) -> Result<Self, CompileError> {
        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(limits.loop_iteration_limit);
        context
            .runtime_limits_mut()
            .set_recursion_limit(limits.recursion_limit);

        // Captured before user code runs, so overriding `JSON.stringify` in a
        // submission cannot influence comparison.
        let (json, stringify) = json_stringify(&mut context).map_err(|e| CompileError::Internal {
            msg: describe(&e, &mut context),
        })?;

        // The full source shares one function scope with the lookup of the
        // entry point, so helpers declared next to it stay reachable.
        let wrapped = format!(
            "(function () {{\n{}\n;return {};\n}})()",
            unit.source, unit.entry
        );
        let value = context
            .eval(Source::from_bytes(wrapped.as_bytes()))
            .map_err(|e| CompileError::CompilationFailed {
                msg: describe(&e, &mut context),
            })?;

        let entry = value
            .as_callable()
            .cloned()
            .ok_or_else(|| CompileError::EntryNotCallable {
                name: unit.entry.clone(),
            })?;

        Ok(Self {
            context,
            entry,
            json,
            stringify,
        })
    }

    fn to_plain(&mut self, value: &JsValue) -> Result<Option<Value>, InvokeError> {
        let text = self
            .stringify
            .call(
                &JsValue::from(self.json.clone()),
                &[value.clone()],
                &mut self.context,
            )
            .map_err(|e| InvokeError::Output {
                msg: describe(&e, &mut self.context),
            })?;

        if text.is_undefined() {
            return Ok(None);
        }
        let Some(text) = text.as_string() else {
            return Err(InvokeError::Output {
                msg: "JSON.stringify returned a non-string value".to_string(),
            });
        };

        serde_json::from_str(&text.to_std_string_escaped())
            .map(Some)
            .map_err(|e| InvokeError::Output { msg: e.to_string() })
    }
}

impl Session for BoaSession {
    fn invoke(&mut self, args: Vec<Value>) -> Result<Option<Value>, InvokeError> {
        let mut js_args = Vec::with_capacity(args.len());
        for arg in &args {
            let value = JsValue::from_json(arg, &mut self.context).map_err(|e| {
                InvokeError::Input {
                    msg: describe(&e, &mut self.context),
                }
            })?;
            js_args.push(value);
        }

        let output = self
            .entry
            .call(&JsValue::undefined(), &js_args, &mut self.context)
            .map_err(|e| InvokeError::Thrown {
                msg: describe(&e, &mut self.context),
            })?;

        self.to_plain(&output)
    }
}

fn json_stringify(context: &mut Context) -> Result<(JsObject, JsObject), JsError> {
    let json = context
        .global_object()
        .get(js_string!("JSON"), context)?;
    let json = json
        .as_object()
        .cloned()
        .ok_or_else(|| JsError::from_opaque(js_string!("JSON is not an object").into()))?;

    let stringify = json.get(js_string!("stringify"), context)?;
    let stringify = stringify
        .as_callable()
        .cloned()
        .ok_or_else(|| JsError::from_opaque(js_string!("JSON.stringify is not callable").into()))?;

    Ok((json, stringify))
}

/// Human-readable message for a thrown value, e.g. `Error: boom`.
fn describe(err: &JsError, context: &mut Context) -> String {
    match err.try_native(context) {
        Ok(native) => native.to_string(),
        Err(_) => err.to_string(),
    }
}

//! Built-in template helpers
//!
//! Installed into every loader before the first parse:
//!
//! - `{{raw html}}` writes its argument without HTML escaping
//! - `{{default value "fallback"}}` renders `value` if truthy, else the fallback
//! - `{{json value}}` writes its argument serialized as JSON
//! - `{{set . "key" value}}` stores `value` under `key` in the render data
//! - `{{append . "key" value}}` pushes `value` onto the array under `key`,
//!   creating it when absent
//!
//! `set` and `append` write nothing. Their changes are visible to the rest of
//! the current render only.

use std::collections::HashMap;

use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, JsonRender, JsonTruthy, Output, RenderContext,
    RenderErrorReason, handlebars_helper,
};
use serde_json::Value as Json;
use tracing::debug;

/// Helpers keyed by the name templates call them with
pub type HelperMap = HashMap<String, Box<dyn HelperDef + Send + Sync>>;

fn raw_helper(h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output) -> HelperResult {
    let param = h.param(0).ok_or(RenderErrorReason::ParamNotFoundForIndex("raw", 0))?;
    out.write(&param.value().render())?;
    Ok(())
}

fn json_helper(h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output) -> HelperResult {
    let param = h.param(0).ok_or(RenderErrorReason::ParamNotFoundForIndex("json", 0))?;
    let text = serde_json::to_string(param.value()).map_err(|e| RenderErrorReason::Other(e.to_string()))?;
    out.write(&text)?;
    Ok(())
}

/// The render data as modified so far by earlier helpers
fn current_context(ctx: &Context, rc: &RenderContext) -> Context {
    match rc.context() {
        Some(modified) => (*modified).clone(),
        None => ctx.clone(),
    }
}

fn key_param<'a>(h: &'a Helper, helper: &'static str) -> Result<&'a str, RenderErrorReason> {
    h.param(0).ok_or(RenderErrorReason::ParamNotFoundForIndex(helper, 0))?;
    h.param(1)
        .ok_or(RenderErrorReason::ParamNotFoundForIndex(helper, 1))?
        .value()
        .as_str()
        .ok_or(RenderErrorReason::InvalidParamType("string"))
}

fn set_helper(h: &Helper, _: &Handlebars, ctx: &Context, rc: &mut RenderContext, _: &mut dyn Output) -> HelperResult {
    let key = key_param(h, "set")?;
    let value = h.param(2).ok_or(RenderErrorReason::ParamNotFoundForIndex("set", 2))?.value().clone();

    let mut context = current_context(ctx, rc);
    let data = context
        .data_mut()
        .as_object_mut()
        .ok_or_else(|| RenderErrorReason::Other("set: render data is not an object".to_string()))?;
    data.insert(key.to_string(), value);
    rc.set_context(context);
    Ok(())
}

fn append_helper(h: &Helper, _: &Handlebars, ctx: &Context, rc: &mut RenderContext, _: &mut dyn Output) -> HelperResult {
    let key = key_param(h, "append")?;
    let value = h.param(2).ok_or(RenderErrorReason::ParamNotFoundForIndex("append", 2))?.value().clone();

    let mut context = current_context(ctx, rc);
    let data = context
        .data_mut()
        .as_object_mut()
        .ok_or_else(|| RenderErrorReason::Other("append: render data is not an object".to_string()))?;
    let entry = data.entry(key.to_string()).or_insert(Json::Null);
    if entry.is_null() {
        *entry = Json::Array(Vec::new());
    }
    match entry {
        Json::Array(items) => items.push(value),
        _ => return Err(RenderErrorReason::Other(format!("append: '{}' is not an array", key)).into()),
    }
    rc.set_context(context);
    Ok(())
}

handlebars_helper!(default_helper: |value: Json, fallback: Json| {
    if value.is_truthy(false) { value.clone() } else { fallback.clone() }
});

/// The helper set every loader starts with
pub fn builtin_helpers() -> HelperMap {
    debug!("builtin_helpers: called");
    let mut helpers: HelperMap = HashMap::new();
    helpers.insert("raw".to_string(), Box::new(raw_helper));
    helpers.insert("default".to_string(), Box::new(default_helper));
    helpers.insert("json".to_string(), Box::new(json_helper));
    helpers.insert("set".to_string(), Box::new(set_helper));
    helpers.insert("append".to_string(), Box::new(append_helper));
    helpers
}

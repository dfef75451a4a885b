//! Host-language source generation
//!
//! The host runs each program with `exec` in a persistent namespace and
//! answers with whatever the program left in the result slot. Everything here
//! builds that text; literals always go through [`quote`](super::quote).

use super::BridgeConfig;
use super::envelope::ResultShape;
use super::error::UsageError;
use super::handle::{CallbackToken, HandleKey};
use super::quote;

/// Placeholder replaced by a freshly opened callback token, once per slot
pub const CALLBACK_PLACEHOLDER: &str = "$CALLBACK_TOKEN";

/// Splice a handle-table entry into source
pub fn handle_ref(config: &BridgeConfig, key: &HandleKey) -> String {
    format!("{}[{}]", config.handle_table, quote::string(key.as_str()))
}

/// Wrap an expression so the host stores its envelope in the result slot
pub fn envelope_program(config: &BridgeConfig, expr: &str, shape: ResultShape) -> String {
    format!(
        "{} = {}(lambda: ({}), {})",
        config.result_slot,
        config.envelope_helper,
        expr,
        quote::string(shape.as_str())
    )
}

/// Host lambda forwarding its parameters to the callback endpoint of one slot
///
/// The token position is left as [`CALLBACK_PLACEHOLDER`] until the channel
/// has opened the endpoint.
pub fn callback_lambda(config: &BridgeConfig, params: &[&str]) -> String {
    let mut call_args = vec![CALLBACK_PLACEHOLDER.to_string()];
    call_args.extend(params.iter().map(|p| p.to_string()));
    format!(
        "lambda {}: {}({})",
        params.join(", "),
        config.callback_helper,
        call_args.join(", ")
    )
}

/// Replace each placeholder, in order, with the quoted token of its slot
pub fn substitute_tokens(template: &str, tokens: &[CallbackToken]) -> Result<String, UsageError> {
    let found = template.matches(CALLBACK_PLACEHOLDER).count();
    if found != tokens.len() {
        return Err(UsageError::PlaceholderMismatch {
            expected: tokens.len(),
            found,
        });
    }

    let mut out = String::with_capacity(template.len() + tokens.len() * 8);
    let mut rest = template;
    for token in tokens {
        // Count matched above, so every token has a placeholder to fill.
        if let Some(pos) = rest.find(CALLBACK_PLACEHOLDER) {
            out.push_str(&rest[..pos]);
            out.push_str(&quote::string(token.as_str()));
            rest = &rest[pos + CALLBACK_PLACEHOLDER.len()..];
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Expression dropping the given keys from the host handle table; yields the count
pub fn release_expr(config: &BridgeConfig, keys: &[HandleKey]) -> String {
    format!(
        "len([{table}.pop(k, None) for k in {keys}])",
        table = config.handle_table,
        keys = quote::string_list(keys.iter().map(HandleKey::as_str)),
    )
}

const PRELUDE_TEMPLATE: &str = r#"import json
import socket
import threading
import uuid

try:
    @TABLE@
except NameError:
    @TABLE@ = {}


def __hostlink_store(obj):
    key = uuid.uuid4().hex
    @TABLE@[key] = obj
    return key


def __hostlink_is_primitive(value):
    if value is None or isinstance(value, (bool, int, float, str)):
        return True
    if isinstance(value, (list, tuple)):
        return all(__hostlink_is_primitive(item) for item in value)
    if isinstance(value, dict):
        return all(isinstance(k, str) and __hostlink_is_primitive(v) for k, v in value.items())
    return False


def __hostlink_wrap(value):
    if value is None:
        return {"kind": "none"}
    if __hostlink_is_primitive(value):
        return {"kind": "primitive", "value": value}
    return {"kind": "handle", "key": __hostlink_store(value)}


def @ENVELOPE@(thunk, shape):
    try:
        value = thunk()
    except Exception as err:
        return {"kind": "error", "message": "%s: %s" % (type(err).__name__, err)}
    if value is None:
        return {"kind": "none"}
    if shape == "handle_list":
        return {"kind": "primitive", "value": [__hostlink_store(item) for item in value]}
    if shape in ("handle", "optional_handle"):
        return {"kind": "handle", "key": __hostlink_store(value)}
    if __hostlink_is_primitive(value):
        return {"kind": "primitive", "value": value}
    return {"kind": "error", "message": "result of type %s is not a primitive" % type(value).__name__}


def @CALLBACK@(token, *args):
    payload = __hostlink_wrap(args[0] if len(args) == 1 else (list(args) or None))

    def send():
        with socket.create_connection((@HOST@, int(token))) as conn:
            conn.sendall((json.dumps(payload) + "\n").encode("utf-8"))

    threading.Thread(target=send, daemon=True).start()


@RESULT@ = {"kind": "primitive", "value": @VERSION@}
"#;

/// Host-side helpers implementing the handle table, envelope, and callback contracts
pub fn host_prelude(config: &BridgeConfig) -> String {
    PRELUDE_TEMPLATE
        .replace("@TABLE@", &config.handle_table)
        .replace("@ENVELOPE@", &config.envelope_helper)
        .replace("@CALLBACK@", &config.callback_helper)
        .replace("@RESULT@", &config.result_slot)
        .replace("@HOST@", &quote::string(&config.callback_host))
        .replace("@VERSION@", &quote::string(crate::PROTOCOL_VERSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_refs_quote_the_key() {
        let config = BridgeConfig::default();
        let code = handle_ref(&config, &HandleKey::new("a'b"));
        assert_eq!(code, "__hostlink_handles['a\\'b']");
    }

    #[test]
    fn envelope_program_names_shape() {
        let config = BridgeConfig::default();
        let code = envelope_program(&config, "sublime.active_window()", ResultShape::Handle);
        assert_eq!(
            code,
            "__hostlink_result = __hostlink_envelope(lambda: (sublime.active_window()), 'handle')"
        );
    }

    #[test]
    fn substitutes_tokens_in_order() {
        let template = format!("f({CALLBACK_PLACEHOLDER}, {CALLBACK_PLACEHOLDER})");
        let tokens = vec![CallbackToken::new("1"), CallbackToken::new("2")];
        assert_eq!(substitute_tokens(&template, &tokens).unwrap(), "f('1', '2')");
    }

    #[test]
    fn placeholder_count_must_match() {
        let template = format!("f({CALLBACK_PLACEHOLDER})");
        let err = substitute_tokens(&template, &[]).unwrap_err();
        assert_eq!(
            err,
            UsageError::PlaceholderMismatch {
                expected: 0,
                found: 1
            }
        );
    }

    #[test]
    fn callback_lambda_forwards_params() {
        let config = BridgeConfig::default();
        assert_eq!(
            callback_lambda(&config, &["index"]),
            "lambda index: __hostlink_callback($CALLBACK_TOKEN, index)"
        );
        assert_eq!(
            callback_lambda(&config, &[]),
            "lambda : __hostlink_callback($CALLBACK_TOKEN)"
        );
    }

    #[test]
    fn prelude_uses_configured_names() {
        let mut config = BridgeConfig::default();
        config.handle_table = "_objs".into();
        let prelude = host_prelude(&config);
        assert!(prelude.contains("_objs[key] = obj"));
        assert!(prelude.contains("def __hostlink_envelope(thunk, shape):"));
        assert!(!prelude.contains('@'));
    }
}

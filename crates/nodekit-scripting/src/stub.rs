//! Generation of the script injected when a channel is bound.
//!
//! For an object bound as principal every method is pre-bound:
//!
//! ```text
//! exports.add = NKScripting.invokeNative.bind(exports, 'add#2s');
//! ```
//!
//! For a factory the receiver is resolved per call:
//!
//! ```text
//! exports.add = function(){return NKScripting.invokeNative.bind(this, 'add#2s').apply(null, arguments);}
//! ```

use crate::plugin::PluginType;

/// `text` as a single-quoted script string literal
fn quoted(text: &str) -> String {
    let mut literal = String::with_capacity(text.len() + 2);
    literal.push('\'');
    for c in text.chars() {
        match c {
            '\\' => literal.push_str("\\\\"),
            '\'' => literal.push_str("\\'"),
            '\n' => literal.push_str("\\n"),
            '\r' => literal.push_str("\\r"),
            c => literal.push(c),
        }
    }
    literal.push('\'');
    literal
}

fn generate_method(key: &str, receiver: &str, prebind: bool) -> String {
    let stub = format!("NKScripting.invokeNative.bind({receiver}, {})", quoted(key));
    if prebind {
        format!("{stub};")
    } else {
        format!("function(){{return {stub}.apply(null, arguments);}}")
    }
}

/// The binding script for `plugin` on channel `channel_id` at `namespace`
pub fn generate_stubs(plugin: &PluginType, channel_id: u64, namespace: &str) -> String {
    let prebind = !plugin.is_factory();
    let receiver = if prebind { "exports" } else { "this" };
    let mut stubs = String::new();

    for member in plugin.type_info().methods() {
        if member.name.is_empty() {
            continue;
        }
        let method = generate_method(&member.key(), receiver, prebind);
        let names = if member.is_async_callback {
            vec![format!("{}Sync", member.name), format!("{}Async", member.name)]
        } else {
            vec![member.name.clone()]
        };
        for name in names {
            let stub = format!("exports.{name} = {method}");
            stubs.push_str(&plugin.rewrite_stub(&stub, &name));
            stubs.push('\n');
        }
    }

    let base = match plugin.type_info().default_constructor() {
        Some(constructor) if !prebind => {
            plugin.rewrite_stub(&quoted(&constructor.js_type()), ".base")
        }
        _ => plugin.rewrite_stub("null", ".base"),
    };
    let local = plugin.rewrite_stub(&stubs, ".local");
    let global = format!(
        "(function(exports) {{\n{local}}})(NKScripting.createPlugin({}, {}, {base}));\n",
        quoted(&channel_id.to_string()),
        quoted(namespace)
    );
    plugin.rewrite_stub(&global, ".global")
}

/// URL the binding script is reported under
pub fn stub_source_url(plugin: &PluginType, namespace: &str) -> String {
    format!("{namespace}/plugin/{}.js", plugin.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginClass;

    struct Clock;

    #[test]
    fn test_principal_stubs() {
        let class = PluginClass::<Clock>::new("Clock")
            .method("now", 0, |_, _| Ok(0))
            .action("reset", 0, |_, _| Ok(()))
            .build();
        assert_eq!(
            generate_stubs(&class, 4, "io.clock"),
            "(function(exports) {\n\
             exports.now = NKScripting.invokeNative.bind(exports, 'now#0s');\n\
             exports.reset = NKScripting.invokeNative.bind(exports, 'reset#0a');\n\
             })(NKScripting.createPlugin('4', 'io.clock', null));\n"
        );
        assert_eq!(stub_source_url(&class, "io.clock"), "io.clock/plugin/Clock.js");
    }

    #[test]
    fn test_factory_stubs() {
        let class = PluginClass::<Clock>::new("Clock")
            .constructor(1, |_| Ok(Clock))
            .async_method("tick", 1, |_, _, completion| completion.complete(1))
            .build();
        let tick = "function(){return NKScripting.invokeNative.bind(this, 'tick#1a').apply(null, arguments);}";
        assert_eq!(
            generate_stubs(&class, 0, "io.Clock"),
            format!(
                "(function(exports) {{\n\
                 exports.tickSync = {tick}\n\
                 exports.tickAsync = {tick}\n\
                 }})(NKScripting.createPlugin('0', 'io.Clock', '#1a'));\n"
            )
        );
    }

    #[test]
    fn test_namespace_is_escaped() {
        let class = PluginClass::<Clock>::new("Clock").build();
        assert_eq!(
            generate_stubs(&class, 2, r"io.it's\clock"),
            "(function(exports) {\n})(NKScripting.createPlugin('2', 'io.it\\'s\\\\clock', null));\n"
        );
        assert_eq!(quoted("a\nb"), r"'a\nb'");
    }

    #[test]
    fn test_rewrite_hook_sees_every_part() {
        let class = PluginClass::<Clock>::new("Clock")
            .method("now", 0, |_, _| Ok(0))
            .rewrite_stub(|stub, key| match key {
                "now" => format!("/* now */ {stub}"),
                ".global" => format!("{stub}// done\n"),
                _ => stub.to_string(),
            })
            .build();
        let script = generate_stubs(&class, 1, "io.clock");
        assert!(script.contains("/* now */ exports.now = "));
        assert!(script.ends_with("// done\n"));
    }
}

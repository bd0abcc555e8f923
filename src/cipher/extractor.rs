use regex::Regex;
use tracing::debug;

use super::sandbox::{self, CompiledFn};

/// Argument name the decipher invocation trailer binds.
pub const DECIPHER_ARGUMENT: &str = "sig";
/// Argument name the n-transform invocation trailer binds.
pub const N_ARGUMENT: &str = "ncode";

/// The two independently-extracted callable fragments of a player script.
/// Either may be absent when every strategy for that fragment type failed.
pub struct ExtractedFns {
    pub decipher: Option<CompiledFn>,
    pub n_transform: Option<CompiledFn>,
}

/// A synthesized executable unit: definitions plus invocation trailer.
pub struct Synthesized {
    pub defs: String,
    pub invocation: String,
}

/// A named extraction strategy. Strategies are tried in table order; the
/// first one whose synthesized unit compiles wins for that fragment type.
pub struct Strategy {
    pub name: &'static str,
    pub run: fn(&str) -> Option<Synthesized>,
}

pub static DECIPHER_STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "decipher:split-join-shape",
        run: decipher_split_join,
    },
    Strategy {
        name: "decipher:callsite-lookup",
        run: decipher_callsite,
    },
];

pub static N_TRANSFORM_STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "ntransform:slice-zero-shape",
        run: n_transform_shape,
    },
    Strategy {
        name: "ntransform:get-n-callsite",
        run: n_transform_callsite,
    },
];

/// Call-site patterns that reveal the decipher function's name. Each entry
/// is (script-revision tag, pattern); coverage gaps trace back to a tag.
const DECIPHER_CALLSITE_PATTERNS: &[(&str, &str)] = &[
    ("sig-or", r"\.sig\|\|([a-zA-Z0-9_$]+)\("),
    (
        "set-signature",
        r#"\.set\(\s*["']signature["']\s*,\s*(?:encodeURIComponent\()?([a-zA-Z0-9_$]+)\("#,
    ),
    (
        "signature-pair",
        r#"["']signature["']\s*,\s*([a-zA-Z0-9_$]+)\("#,
    ),
    (
        "set-sp-encode",
        r"&&\s*[a-zA-Z0-9_$]+\.set\([^,]+,\s*encodeURIComponent\(([a-zA-Z0-9_$]+)\(",
    ),
];

/// Call-site patterns that reveal the n-transform function's name. The name
/// may be reached through a one-element array indirection.
const N_CALLSITE_PATTERNS: &[(&str, &str)] = &[
    (
        "get-n-assign",
        r#"\(\s*[a-zA-Z0-9_$]+\s*=\s*[a-zA-Z0-9_$]+\.get\(\s*["']n["']\s*\)\s*\)\s*&&\s*\(\s*[a-zA-Z0-9_$]+\s*=\s*([a-zA-Z0-9_$]+)(?:\[(\d+)\])?\(\s*[a-zA-Z0-9_$]+\s*\)"#,
    ),
    (
        "n-param-short",
        r#"\.get\(\s*["']n["']\s*\)\)&&\(\s*[a-zA-Z0-9_$]+\s*=\s*([a-zA-Z0-9_$]+)(?:\[(\d+)\])?\("#,
    ),
];

/// Extract both fragments from a player script body.
pub fn extract(script: &str) -> ExtractedFns {
    ExtractedFns {
        decipher: first_compiling(DECIPHER_STRATEGIES, script, DECIPHER_ARGUMENT),
        n_transform: first_compiling(N_TRANSFORM_STRATEGIES, script, N_ARGUMENT),
    }
}

fn first_compiling(
    strategies: &[Strategy],
    script: &str,
    arg: &'static str,
) -> Option<CompiledFn> {
    for strategy in strategies {
        let Some(unit) = (strategy.run)(script) else {
            continue;
        };
        match sandbox::compile(unit.defs, unit.invocation, arg) {
            Ok(compiled) => {
                debug!(strategy = strategy.name, "cipher fragment extracted");
                return Some(compiled);
            }
            Err(e) => {
                debug!(strategy = strategy.name, error = %e, "strategy matched but did not compile");
            }
        }
    }
    None
}

/// Strategy (a): direct structural match of the canonical
/// `X=function(a){a=a.split("");…;return a.join("")}` shape.
fn decipher_split_join(script: &str) -> Option<Synthesized> {
    // The regex crate has no backreferences, so the param is captured and the
    // split/join shape verified against the scanned body afterwards.
    let heads = [
        Regex::new(r"(?:^|[;,\s])(?:var\s+)?([a-zA-Z0-9_$]+)\s*=\s*function\s*\(\s*([a-zA-Z0-9_$]+)\s*\)\s*\{").ok()?,
        Regex::new(r"function\s+([a-zA-Z0-9_$]+)\s*\(\s*([a-zA-Z0-9_$]+)\s*\)\s*\{").ok()?,
    ];

    for head in &heads {
        for caps in head.captures_iter(script) {
            let name = caps.get(1)?.as_str();
            let param = caps.get(2)?.as_str();
            let brace = caps.get(0)?.end() - 1;
            let body = balanced_slice(&script[brace..], '{', '}')?;

            if !(body.contains(&format!("{}.split(\"\")", param))
                && body.contains(&format!("return {}.join(\"\")", param)))
            {
                continue;
            }

            return synthesize_decipher(script, name, param, body);
        }
    }
    None
}

/// Strategy (b): locate the function name through a battery of
/// version-specific call-site patterns, then extract the named body.
fn decipher_callsite(script: &str) -> Option<Synthesized> {
    for (tag, pattern) in DECIPHER_CALLSITE_PATTERNS {
        let Ok(re) = Regex::new(pattern) else { continue };
        let Some(caps) = re.captures(script) else {
            continue;
        };
        let name = caps.get(1).map(|m| m.as_str())?;
        debug!(pattern = tag, name, "decipher call-site matched");

        if let Some((param, body)) = function_expression(script, name) {
            return synthesize_decipher(script, name, &param, &body);
        }
    }
    None
}

fn synthesize_decipher(
    script: &str,
    name: &str,
    param: &str,
    body: &str,
) -> Option<Synthesized> {
    let mut defs = String::new();

    // The function body calls into a companion operations object
    // (reverse/splice/swap members); pull it in when present.
    if let Some(helper) = helper_object_name(body, param) {
        if helper != name {
            if let Some(obj) = object_definition(script, &helper) {
                defs.push_str(&obj);
                defs.push('\n');
            }
        }
    }

    defs.push_str(&format!("var {}=function({}){};", name, param, body));
    Some(Synthesized {
        defs,
        invocation: format!("{}({});", name, DECIPHER_ARGUMENT),
    })
}

/// Strategy (a): direct shape of the n-transform,
/// `X=function(a){var b=a.split(a.slice(0,0))…}` and variants.
fn n_transform_shape(script: &str) -> Option<Synthesized> {
    let head = Regex::new(
        r"(?:^|[;,\s])(?:var\s+)?([a-zA-Z0-9_$]+)\s*=\s*function\s*\(\s*([a-zA-Z0-9_$]+)\s*\)\s*\{",
    )
    .ok()?;

    for caps in head.captures_iter(script) {
        let name = caps.get(1)?.as_str();
        let param = caps.get(2)?.as_str();
        let brace = caps.get(0)?.end() - 1;
        let body = balanced_slice(&script[brace..], '{', '}')?;

        let splits_on_empty_slice = body.contains(&format!("{p}.split({p}.slice(0,0))", p = param))
            || body.contains(&format!("String.prototype.split.call({},", param));
        // Older revisions tag the function with a throttling sentinel instead.
        let has_sentinel = body.contains("enhanced_except") || body.contains("_w8_");

        if splits_on_empty_slice || (has_sentinel && body.contains(".join(\"\")")) {
            return Some(synthesize_n(name, param, body));
        }
    }
    None
}

/// Strategy (b): find the n-transform's name at its `get("n")` call site,
/// resolving a one-element array indirection when present.
fn n_transform_callsite(script: &str) -> Option<Synthesized> {
    for (tag, pattern) in N_CALLSITE_PATTERNS {
        let Ok(re) = Regex::new(pattern) else { continue };
        let Some(caps) = re.captures(script) else {
            continue;
        };
        let mut name = caps.get(1)?.as_str().to_string();

        if let Some(idx) = caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok()) {
            name = resolve_array_element(script, &name, idx)?;
        }
        debug!(pattern = tag, name = %name, "n-transform call-site matched");

        if let Some((param, body)) = function_expression(script, &name) {
            return Some(synthesize_n(&name, &param, &body));
        }
    }
    None
}

fn synthesize_n(name: &str, param: &str, body: &str) -> Synthesized {
    Synthesized {
        defs: format!("var {}=function({}){};", name, param, body),
        invocation: format!("{}({});", name, N_ARGUMENT),
    }
}

/// Resolve `name` through `var name=[elem0,elem1,…]`, returning element `idx`.
fn resolve_array_element(script: &str, name: &str, idx: usize) -> Option<String> {
    let re = Regex::new(&format!(
        r"var\s+{}\s*=\s*\[([^\]]*)\]",
        regex::escape(name)
    ))
    .ok()?;
    let list = re.captures(script)?.get(1)?.as_str();
    list.split(',')
        .map(str::trim)
        .nth(idx)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Locate a named function expression (`name=function(p){…}` or
/// `function name(p){…}`) and return its parameter and braced body.
/// Bodies contain nested braces, so the body is taken by balanced scan.
fn function_expression(script: &str, name: &str) -> Option<(String, String)> {
    let escaped = regex::escape(name);
    let heads = [
        format!(
            r"(?:^|[^a-zA-Z0-9_$]){}\s*=\s*function\s*\(\s*([a-zA-Z0-9_$]+)\s*\)\s*\{{",
            escaped
        ),
        format!(
            r"function\s+{}\s*\(\s*([a-zA-Z0-9_$]+)\s*\)\s*\{{",
            escaped
        ),
    ];

    for head in &heads {
        let Ok(re) = Regex::new(head) else { continue };
        if let Some(caps) = re.captures(script) {
            let param = caps.get(1)?.as_str().to_string();
            let brace = caps.get(0)?.end() - 1;
            let body = balanced_slice(&script[brace..], '{', '}')?;
            return Some((param, body.to_string()));
        }
    }
    None
}

/// Find the companion operations-object name referenced from a decipher body
/// via `OBJ.member(param,N)` or `OBJ["member"](param,N)` calls.
fn helper_object_name(body: &str, param: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r#"([a-zA-Z0-9_$]+)(?:\.[a-zA-Z0-9_$]+|\[["'][a-zA-Z0-9_$]+["']\])\(\s*{}\s*,\s*\d+\s*\)"#,
        regex::escape(param)
    ))
    .ok()?;
    re.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extract `var NAME={…};` for the named object via balanced scan.
fn object_definition(script: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r"(?:^|[;,\s])(?:var\s+)?{}\s*=\s*\{{",
        regex::escape(name)
    ))
    .ok()?;
    let m = re.find(script)?;
    let brace = m.end() - 1;
    let obj = balanced_slice(&script[brace..], '{', '}')?;
    Some(format!("var {}={};", name, obj))
}

/// Return the balanced `open…close` block starting at the first non-space
/// character of `src` (which must be `open`), string- and escape-aware.
/// Pure regex cannot do this because the blocks nest.
pub(crate) fn balanced_slice(src: &str, open: char, close: char) -> Option<&str> {
    let trimmed = src.trim_start();
    let offset = src.len() - trimmed.len();
    if !trimmed.starts_with(open) {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for (i, c) in trimmed.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match in_string {
            Some(quote) => match c {
                '\\' => escaped = true,
                _ if c == quote => in_string = None,
                _ => {}
            },
            None => {
                if c == '"' || c == '\'' || c == '`' {
                    in_string = Some(c);
                } else if c == open {
                    depth += 1;
                } else if c == close {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&src[offset..=offset + i]);
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYER_SCRIPT: &str = r#"
var f0={reverse:function(a){a.reverse()},splice:function(a,b){a.splice(0,b)},swap:function(a,b){var c=a[0];a[0]=a[b%a.length];a[b%a.length]=c}};
var d0=function(a){a=a.split("");f0.reverse(a,3);f0.splice(a,2);f0.swap(a,1);return a.join("")};
var n0=function(a){var b=a.split(a.slice(0,0));b.push(String.fromCharCode(110));b.reverse();return b.join("")};
g.set("signature",d0(h));c&&(b=a.get("n"))&&(b=n0(b),a.set("n",b));
"#;

    #[test]
    fn extracts_and_runs_decipher() {
        let fns = extract(PLAYER_SCRIPT);
        let decipher = fns.decipher.expect("decipher fragment");
        // "abcdef" -> reverse -> "fedcba" -> splice(0,2) -> "dcba" -> swap(1) -> "cdba"
        assert_eq!(decipher.invoke("abcdef").unwrap(), "cdba");
    }

    #[test]
    fn extracts_and_runs_n_transform() {
        let fns = extract(PLAYER_SCRIPT);
        let n = fns.n_transform.expect("n-transform fragment");
        assert_eq!(n.invoke("abc").unwrap(), "ncba");
    }

    #[test]
    fn n_transform_absent_leaves_none() {
        let script = r#"
var f0={reverse:function(a){a.reverse()}};
var d0=function(a){a=a.split("");f0.reverse(a,1);return a.join("")};
g.set("signature",d0(h));
"#;
        let fns = extract(script);
        assert!(fns.decipher.is_some());
        assert!(fns.n_transform.is_none());
    }

    #[test]
    fn callsite_lookup_covers_unshaped_decipher() {
        // Body does not start with the canonical split, but the call site
        // names the function.
        let script = r#"
var q9=function(z){var y=z.split("");y.reverse();return y.join("")};
k.set("signature",encodeURIComponent(q9(v)));
"#;
        let fns = extract(script);
        let decipher = fns.decipher.expect("decipher via call site");
        assert_eq!(decipher.invoke("xyz").unwrap(), "zyx");
    }

    #[test]
    fn n_callsite_resolves_array_indirection() {
        let script = r#"
var realN=function(a){var b=a.split("");b.reverse();return b.join("")};
var arr=[realN];
c&&(b=a.get("n"))&&(b=arr[0](b),a.set("n",b));
"#;
        let fns = extract(script);
        let n = fns.n_transform.expect("n via array indirection");
        assert_eq!(n.invoke("abc").unwrap(), "cba");
    }

    #[test]
    fn balanced_slice_handles_strings_and_nesting() {
        let src = r#"{a:{b:"}"},c:'{'}"#;
        assert_eq!(balanced_slice(src, '{', '}'), Some(src));
        assert_eq!(balanced_slice("no brace", '{', '}'), None);
        assert_eq!(balanced_slice("{unclosed", '{', '}'), None);
    }
}

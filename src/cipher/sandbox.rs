use boa_engine::{Context, Source};

use crate::error::{Error, Result};

/// A compiled cipher fragment: the synthesized definitions plus a fixed
/// invocation trailer bound to a single named argument.
///
/// Each `invoke` runs in a fresh engine context exposing only the input
/// binding, so platform script fragments never see ambient process state and
/// repeated calls with the same input are deterministic.
#[derive(Debug, Clone)]
pub struct CompiledFn {
    defs: String,
    invocation: String,
    arg: &'static str,
}

/// Validates that `defs` parses and evaluates (function/object definitions
/// only, no side effects of interest), and packages it with its trailer.
pub fn compile(defs: String, invocation: String, arg: &'static str) -> Result<CompiledFn> {
    let mut ctx = Context::default();
    ctx.eval(Source::from_bytes(defs.as_bytes()))
        .map_err(|e| Error::Extraction(format!("fragment does not compile: {}", e)))?;

    Ok(CompiledFn {
        defs,
        invocation,
        arg,
    })
}

impl CompiledFn {
    /// Run the fragment against `input`, returning the transformed string.
    pub fn invoke(&self, input: &str) -> Result<String> {
        let bound = serde_json::to_string(input)
            .map_err(|e| Error::Extraction(format!("argument encode: {}", e)))?;
        let unit = format!(
            "{defs}\nvar {arg}={bound};\n{call}",
            defs = self.defs,
            arg = self.arg,
            bound = bound,
            call = self.invocation,
        );

        let mut ctx = Context::default();
        let value = ctx
            .eval(Source::from_bytes(unit.as_bytes()))
            .map_err(|e| Error::Extraction(format!("fragment execution: {}", e)))?;
        let s = value
            .to_string(&mut ctx)
            .map_err(|e| Error::Extraction(format!("fragment result: {}", e)))?;
        Ok(s.to_std_string_escaped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_is_deterministic() {
        let f = compile(
            "var rot=function(a){a=a.split(\"\");a.reverse();return a.join(\"\")};".to_string(),
            "rot(sig);".to_string(),
            "sig",
        )
        .unwrap();

        assert_eq!(f.invoke("abc").unwrap(), "cba");
        assert_eq!(f.invoke("abc").unwrap(), "cba");
    }

    #[test]
    fn bad_fragment_fails_compile() {
        assert!(compile("var x = function(a{".to_string(), "x(sig);".to_string(), "sig").is_err());
    }

    #[test]
    fn runtime_fault_surfaces_as_error() {
        let f = compile(
            "var f=function(a){return a.noSuchMethod()};".to_string(),
            "f(sig);".to_string(),
            "sig",
        )
        .unwrap();
        assert!(f.invoke("abc").is_err());
    }
}

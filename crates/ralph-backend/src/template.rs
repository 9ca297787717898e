//! Argument templating and option flattening for the external-process
//! backend contract. The spawning shim itself is out of scope; these free
//! functions are what a real implementation would call before `exec`.

use std::collections::BTreeMap;

/// The four (five, counting `session_id`) template variables an external
/// backend's argument list may reference.
pub struct TemplateVars<'a> {
    pub prompt: &'a str,
    pub model: &'a str,
    pub sandbox: &'a str,
    pub iteration: u64,
    pub session_id: &'a str,
}

/// Exact textual replacement of `{prompt}`, `{model}`, `{sandbox}`,
/// `{iteration}`, `{session_id}` in a single argument.
pub fn substitute(arg: &str, vars: &TemplateVars) -> String {
    arg.replace("{prompt}", vars.prompt)
        .replace("{model}", vars.model)
        .replace("{sandbox}", vars.sandbox)
        .replace("{iteration}", &vars.iteration.to_string())
        .replace("{session_id}", vars.session_id)
}

/// Build the final argument vector: templated positional args followed by
/// `--key value` option pairs, keys sorted ascending for reproducibility.
pub fn build_args(positional: &[String], vars: &TemplateVars, options: &BTreeMap<String, String>) -> Vec<String> {
    let mut out: Vec<String> = positional.iter().map(|a| substitute(a, vars)).collect();
    for (key, value) in options {
        out.push(format!("--{key}"));
        out.push(value.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> TemplateVars<'static> {
        TemplateVars {
            prompt: "do the thing",
            model: "claude-opus",
            sandbox: "/tmp/sandbox",
            iteration: 3,
            session_id: "sess-1",
        }
    }

    #[test]
    fn substitutes_all_variables() {
        let arg = "--prompt={prompt} --model={model} --cwd={sandbox} --iter={iteration} --sid={session_id}";
        let out = substitute(arg, &vars());
        assert_eq!(
            out,
            "--prompt=do the thing --model=claude-opus --cwd=/tmp/sandbox --iter=3 --sid=sess-1"
        );
    }

    #[test]
    fn options_are_sorted_ascending() {
        let mut options = BTreeMap::new();
        options.insert("zeta".to_string(), "1".to_string());
        options.insert("alpha".to_string(), "2".to_string());
        let out = build_args(&["{prompt}".to_string()], &vars(), &options);
        assert_eq!(
            out,
            vec![
                "do the thing".to_string(),
                "--alpha".to_string(),
                "2".to_string(),
                "--zeta".to_string(),
                "1".to_string(),
            ]
        );
    }
}

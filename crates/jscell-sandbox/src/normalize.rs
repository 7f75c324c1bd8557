//! Strips trailing module-export syntax so ES-module-shaped code runs as a
//! plain script.
//!
//! Every pattern is anchored to the end of the input: an `export` that is not
//! the last statement (including one inside a string or comment) is never
//! touched.

use std::sync::LazyLock;

use regex::Regex;

/// Export shapes recognised at the tail of submitted code, in match order.
static TRAILING_EXPORTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // export { fn as default }
        r"\bexport\s*\{\s*[A-Za-z_$][\w$]*\s+as\s+default\s*\}\s*\z",
        // export default fn
        r"\bexport\s+default\s+[A-Za-z_$][\w$]*\s*\z",
        // export { a, b as c }
        r"\bexport\s*\{[\s\w$,]*\}\s*\z",
        // export * from "./mod"
        r#"\bexport\s*\*\s*from\s*(?:"[^"\n]*"|'[^'\n]*')\s*\z"#,
        // module.exports = fn
        r"\bmodule\.exports\s*=\s*[A-Za-z_$][\w$]*\s*\z",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Remove trailing export statements from `code`.
///
/// Idempotent: normalizing already-normalized code returns it unchanged.
pub fn normalize(code: &str) -> String {
    let mut current = retrim(code);

    loop {
        if current.is_empty() {
            break;
        }
        let Some(start) = TRAILING_EXPORTS
            .iter()
            .find_map(|re| re.find(current).map(|m| m.start()))
        else {
            break;
        };
        current = retrim(&current[..start]);
    }

    current.to_string()
}

/// Trim surrounding whitespace and any run of trailing semicolons.
fn retrim(code: &str) -> &str {
    code.trim_start()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_export_default_identifier() {
        assert_eq!(normalize("function f(){} export default f;"), "function f(){}");
    }

    #[test]
    fn strips_export_default_from_multiline_module() {
        let code = "function mul(a, b) {\n  return a * b;\n}\n\nexport default mul;\n";
        assert_eq!(normalize(code), "function mul(a, b) {\n  return a * b;\n}");
    }

    #[test]
    fn strips_named_default_reexport() {
        assert_eq!(
            normalize("function g(){}\nexport { g as default };"),
            "function g(){}"
        );
    }

    #[test]
    fn strips_named_export_list() {
        assert_eq!(
            normalize("function a(){}\nfunction b(){}\nexport { a, b };"),
            "function a(){}\nfunction b(){}"
        );
        assert_eq!(normalize("const x = 1;\nexport { x as y, x }"), "const x = 1");
    }

    #[test]
    fn strips_star_reexport() {
        assert_eq!(normalize("const v = 2;\nexport * from './lib';"), "const v = 2");
        assert_eq!(normalize("const v = 2;\nexport * from \"lib\""), "const v = 2");
    }

    #[test]
    fn strips_commonjs_export() {
        assert_eq!(
            normalize("function handler(){}\nmodule.exports = handler;"),
            "function handler(){}"
        );
    }

    #[test]
    fn strips_stacked_trailing_exports() {
        let code = "function f(){}\nexport { f };\nexport default f;\nmodule.exports = f;";
        assert_eq!(normalize(code), "function f(){}");
    }

    #[test]
    fn preserves_non_trailing_occurrences() {
        let code = "function f(){ return 'export default x'; }";
        assert_eq!(normalize(code), code);

        let code = "// export default f\nfunction f(){ return 1; }";
        assert_eq!(normalize(code), code);
    }

    #[test]
    fn preserves_mid_file_exports() {
        let code = "export default f;\nfunction f(){}";
        assert_eq!(normalize(code), code);
    }

    #[test]
    fn is_idempotent() {
        let samples = [
            "function f(){} export default f;",
            "const a = 1;",
            "function f(){ return 'export default x'; }",
            "  function g(){}\n\nexport { g };\n  ",
            "export default f",
            "const a = 1;;",
            "function f(){}\nexport default f;;\n ; ;",
            "",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn collapses_repeated_trailing_semicolons() {
        assert_eq!(normalize("const a = 1;;"), "const a = 1");
        assert_eq!(normalize("function f(){}\nexport { f };;; ;"), "function f(){}");
    }

    #[test]
    fn export_only_input_normalizes_to_empty() {
        assert_eq!(normalize("export default f;"), "");
        assert_eq!(normalize("  ;  "), "");
    }

    #[test]
    fn does_not_strip_identifier_suffix_lookalikes() {
        let code = "const reexport = 1; myexport default";
        assert_eq!(normalize(code), code);
    }
}

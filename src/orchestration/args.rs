//! Command line helpers for option strings
//!
//! Maven options arrive as a single string (`-Xmx1g "-Dname=a b"`) and have
//! to become separate arguments. `$VAR` and `${VAR}` references are expanded
//! from the build environment first.

use std::collections::BTreeMap;

/// Split `input` into arguments.
///
/// Whitespace separates arguments unless quoted with `'` or `"`. A backslash
/// escapes the next character outside single quotes. Quotes are removed.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') | (Some('"'), '"') => quote = None,
            (Some('\''), c) => current.push(c),
            (_, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_token = true;
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_token = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_token {
        args.push(current);
    }
    args
}

/// Replace `$VAR` and `${VAR}` with values from `env`.
///
/// Unknown variables are left as written.
pub fn expand(input: &str, env: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match env.get(name).filter(|_| !name.is_empty()) {
            Some(value) => out.push_str(value),
            None => {
                out.push('$');
                out.push_str(&after[..consumed]);
            }
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_plain_and_quoted() {
        assert_eq!(
            tokenize(r#"-Xmx1g  "-Dname=a b" '-Dx=$y' plain"#),
            vec!["-Xmx1g", "-Dname=a b", "-Dx=$y", "plain"]
        );
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn tokenize_escapes_and_empty_quotes() {
        assert_eq!(tokenize(r"a\ b c"), vec!["a b", "c"]);
        assert_eq!(tokenize(r#"-D"" next"#), vec!["-D", "next"]);
        assert_eq!(tokenize(r#""""#), vec![""]);
    }

    #[test]
    fn expand_known_and_unknown() {
        let mut env = BTreeMap::new();
        env.insert("HOME".to_string(), "/home/ci".to_string());
        env.insert("BUILD_NUMBER".to_string(), "42".to_string());

        assert_eq!(
            expand("-Duser.home=$HOME/x -Dn=${BUILD_NUMBER}", &env),
            "-Duser.home=/home/ci/x -Dn=42"
        );
        assert_eq!(expand("$MISSING ${ALSO} $", &env), "$MISSING ${ALSO} $");
        assert_eq!(expand("${UNCLOSED", &env), "${UNCLOSED");
    }
}

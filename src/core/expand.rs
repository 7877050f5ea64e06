//! Variable Expander — §4.6.
//!
//! Only `${NAME}` is recognized syntax; a bare `$NAME` is a syntax error.
//! `\$` and `\\` are the only valid escapes. A variable read from the
//! system environment is treated as a literal — it is never re-expanded.

use std::collections::{HashMap, HashSet};

use crate::core::env_filter::{read_system_env, Allowlist};
use crate::core::error::ExpansionError;

const RESERVED_PREFIX: &str = "__RUNNER_";

/// Rejects user-declared keys using the reserved `__RUNNER_*` prefix.
pub fn check_not_reserved(key: &str) -> Result<(), ExpansionError> {
    if key.starts_with(RESERVED_PREFIX) {
        Err(ExpansionError::NotInAllowlist(key.to_string()))
    } else {
        Ok(())
    }
}

/// Parse `value` into a sequence of literal spans and `${NAME}` references,
/// validating escape sequences along the way.
fn tokenize(value: &str) -> Result<Vec<Token<'_>>, ExpansionError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let bytes = value.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let next = bytes.get(i + 1).copied();
                match next {
                    Some(b'$') => {
                        literal.push('$');
                        i += 2;
                    }
                    Some(b'\\') => {
                        literal.push('\\');
                        i += 2;
                    }
                    Some(c) => {
                        return Err(ExpansionError::InvalidEscapeSequence(c as char));
                    }
                    None => {
                        return Err(ExpansionError::InvalidEscapeSequence('\0'));
                    }
                }
            }
            b'$' => {
                if bytes.get(i + 1) != Some(&b'{') {
                    return Err(ExpansionError::InvalidVariableFormat(value.to_string()));
                }
                let close = value[i + 2..]
                    .find('}')
                    .ok_or_else(|| ExpansionError::InvalidVariableFormat(value.to_string()))?;
                let name = &value[i + 2..i + 2 + close];
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(Token::Var(name));
                i += 2 + close + 1;
            }
            _ => {
                // Safe: we only ever slice on ASCII control bytes above, so
                // stepping one UTF-8 codepoint at a time here is correct.
                let ch_len = utf8_char_len(bytes[i]);
                literal.push_str(&value[i..i + ch_len]);
                i += ch_len;
            }
        }
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    Ok(tokens)
}

fn utf8_char_len(first_byte: u8) -> usize {
    if first_byte & 0x80 == 0 {
        1
    } else if first_byte & 0xE0 == 0xC0 {
        2
    } else if first_byte & 0xF0 == 0xE0 {
        3
    } else {
        4
    }
}

enum Token<'a> {
    Literal(String),
    Var(&'a str),
}

/// Expand `value` using `resolve` for each `${NAME}` found. `resolve`
/// returns an already-literal string (no further expansion is applied to
/// what it returns).
pub fn expand_string(
    value: &str,
    resolve: &mut dyn FnMut(&str) -> Result<Option<String>, ExpansionError>,
) -> Result<String, ExpansionError> {
    let tokens = tokenize(value)?;
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Literal(s) => out.push_str(&s),
            Token::Var(name) => {
                let resolved = resolve(name)?
                    .ok_or_else(|| ExpansionError::VariableNotFound(name.to_string()))?;
                out.push_str(&resolved);
            }
        }
    }
    Ok(out)
}

/// Insertion-ordered, duplicate-checked set of raw `key = value` entries for
/// one scope's `env` block, prior to expansion.
#[derive(Debug, Clone, Default)]
pub struct RawEnvBlock {
    order: Vec<String>,
    values: HashMap<String, String>,
}

impl RawEnvBlock {
    pub fn insert(&mut self, key: String, value: String) -> Result<(), ExpansionError> {
        check_not_reserved(&key)
            .map_err(|_| ExpansionError::NotInAllowlist(key.clone()))?;
        if self.values.contains_key(&key) {
            return Err(ExpansionError::VariableNotFound(format!(
                "duplicate key '{key}' in scope"
            )));
        }
        self.order.push(key.clone());
        self.values.insert(key, value);
        Ok(())
    }
}

/// Already-expanded values from an enclosing scope, consulted literally.
pub type ExpandedEnv = HashMap<String, String>;

/// Expand one scope's `env` block. Self-references within the block are
/// resolved recursively with cycle detection; parent scopes and the system
/// environment are consulted, in that precedence order, only after the
/// block's own keys are exhausted.
pub fn expand_env_block(
    raw: &RawEnvBlock,
    parents: &[&ExpandedEnv],
    allowlist: &Allowlist,
) -> Result<ExpandedEnv, ExpansionError> {
    let mut resolved: HashMap<String, String> = HashMap::new();
    let mut in_progress: HashSet<String> = HashSet::new();

    fn resolve_one(
        name: &str,
        raw: &RawEnvBlock,
        parents: &[&ExpandedEnv],
        allowlist: &Allowlist,
        resolved: &mut HashMap<String, String>,
        in_progress: &mut HashSet<String>,
    ) -> Result<String, ExpansionError> {
        if let Some(v) = resolved.get(name) {
            return Ok(v.clone());
        }
        if let Some(raw_value) = raw.values.get(name) {
            if !in_progress.insert(name.to_string()) {
                return Err(ExpansionError::CircularReference(name.to_string()));
            }
            let mut resolve_fn = |inner: &str| -> Result<Option<String>, ExpansionError> {
                if inner == name || raw.values.contains_key(inner) {
                    return resolve_one(inner, raw, parents, allowlist, resolved, in_progress)
                        .map(Some);
                }
                Ok(lookup_parent_or_env(inner, parents, allowlist))
            };
            let expanded = expand_string(raw_value, &mut resolve_fn)?;
            in_progress.remove(name);
            resolved.insert(name.to_string(), expanded.clone());
            return Ok(expanded);
        }
        lookup_parent_or_env(name, parents, allowlist)
            .ok_or_else(|| ExpansionError::VariableNotFound(name.to_string()))
    }

    for key in &raw.order {
        let value = resolve_one(key, raw, parents, allowlist, &mut resolved, &mut in_progress)?;
        resolved.insert(key.clone(), value);
    }

    Ok(resolved)
}

fn lookup_parent_or_env(
    name: &str,
    parents: &[&ExpandedEnv],
    allowlist: &Allowlist,
) -> Option<String> {
    for parent in parents {
        if let Some(v) = parent.get(name) {
            return Some(v.clone());
        }
    }
    read_system_env(name, allowlist)
}

/// Build a resolver for expanding non-`env` fields (verify_files, cmd,
/// args): consults the given expanded scopes then the system environment,
/// with no self-scope and no recursive re-expansion.
pub fn scope_resolver<'a>(
    scopes: &'a [&'a ExpandedEnv],
    allowlist: &'a Allowlist,
) -> impl FnMut(&str) -> Result<Option<String>, ExpansionError> + 'a {
    move |name: &str| Ok(lookup_parent_or_env(name, scopes, allowlist))
}

//! Rule module text format.
//!
//! ```text
//! package service.policy
//!
//! # comment
//! rule ruleAdminOnly:
//!     x = has_role(Roles, "ADMIN")
//! ```
//!
//! A body runs until the next `rule` header and is handed to the expression
//! engine untouched (joined with newlines).
use std::collections::BTreeMap;

use super::PolicyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub package: String,
    pub rules: BTreeMap<String, String>,
}

impl Module {
    pub fn parse(text: &str) -> Result<Self, PolicyError> {
        let mut package: Option<String> = None;
        let mut rules: BTreeMap<String, String> = BTreeMap::new();
        let mut current: Option<(String, Vec<&str>)> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix("package ") {
                if package.is_some() {
                    return Err(parse_error(line_no, "duplicate package declaration"));
                }
                let name = name.trim();
                if name.is_empty() {
                    return Err(parse_error(line_no, "empty package name"));
                }
                package = Some(name.to_string());
                continue;
            }

            if let Some(header) = line.strip_prefix("rule ") {
                let Some(name) = header.trim().strip_suffix(':') else {
                    return Err(parse_error(line_no, "rule header must end with ':'"));
                };
                if let Some((prev, body)) = current.take() {
                    finish_rule(&mut rules, prev, body, line_no)?;
                }
                current = Some((name.trim().to_string(), Vec::new()));
                continue;
            }

            match current.as_mut() {
                Some((_, body)) => body.push(line),
                None => return Err(parse_error(line_no, "statement outside of a rule")),
            }
        }

        if let Some((name, body)) = current.take() {
            finish_rule(&mut rules, name, body, text.lines().count())?;
        }

        let package = package.ok_or_else(|| parse_error(1, "missing package declaration"))?;
        Ok(Self { package, rules })
    }
}

fn finish_rule(
    rules: &mut BTreeMap<String, String>,
    name: String,
    body: Vec<&str>,
    line_no: usize,
) -> Result<(), PolicyError> {
    if name.is_empty() {
        return Err(parse_error(line_no, "empty rule name"));
    }
    if body.is_empty() {
        return Err(parse_error(line_no, &format!("rule {name} has no body")));
    }
    if rules.contains_key(&name) {
        return Err(parse_error(line_no, &format!("rule {name} defined twice")));
    }
    rules.insert(name, body.join("\n"));
    Ok(())
}

fn parse_error(line: usize, msg: &str) -> PolicyError {
    PolicyError::EvaluationFailed(format!("module parse error at line {line}: {msg}"))
}

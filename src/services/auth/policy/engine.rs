//! Declarative rule evaluation behind a small trait, so the adapter can be
//! driven by a fake in tests.
//!
//! `ExprPolicyEngine` evaluates rule bodies with evalexpr. Input fields become
//! variables (`Roles`, `Token`, ...); a rule answers by assigning `x`.
use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use evalexpr::{
    Context, ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError,
    Function, HashMapContext, Node, Value as EvalValue, build_operator_tree,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use once_cell::sync::OnceCell;
use serde_json::Value;

use super::{PolicyError, module::Module};

/// Result row: variable name → value.
pub type Bindings = HashMap<String, Value>;

/// `x = data.<package>.<rule>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub package: String,
    pub rule: String,
    pub binding: String,
}

impl Query {
    pub fn new(package: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            rule: rule.into(),
            binding: "x".to_string(),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = data.{}.{}", self.binding, self.package, self.rule)
    }
}

#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Zero rows means the rule is undefined for this input.
    async fn evaluate(&self, query: &Query, input: Value) -> Result<Vec<Bindings>, PolicyError>;
}

struct PreparedRule {
    source: String,
    tree: OnceCell<Node>,
}

impl PreparedRule {
    fn compiled(&self) -> Result<&Node, PolicyError> {
        self.tree.get_or_try_init(|| {
            build_operator_tree(&self.source)
                .map_err(|e| PolicyError::EvaluationFailed(format!("compile: {e}")))
        })
    }

    fn run(&self, query: &Query, input: &Value) -> Result<Vec<Bindings>, PolicyError> {
        let tree = self.compiled()?;
        let mut ctx = build_context(input)?;

        let out = tree
            .eval_with_context_mut(&mut ctx)
            .map_err(|e| PolicyError::EvaluationFailed(format!("{query}: {e}")))?;

        let Some(bound) = ctx.get_value(&query.binding) else {
            // Nothing assigned and nothing produced: undefined.
            if matches!(out, EvalValue::Empty) {
                return Ok(Vec::new());
            }
            return Ok(vec![Bindings::new()]);
        };

        let mut row = Bindings::new();
        row.insert(query.binding.clone(), eval_to_json(bound));
        Ok(vec![row])
    }
}

/// Policy engine over in-process rule modules.
///
/// Modules are parsed when the engine is built; each rule body is compiled the
/// first time it is queried and the compiled tree is reused afterwards.
pub struct ExprPolicyEngine {
    rules: HashMap<(String, String), Arc<PreparedRule>>,
}

impl fmt::Debug for ExprPolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .rules
            .keys()
            .map(|(pkg, rule)| format!("{pkg}.{rule}"))
            .collect();
        names.sort();
        f.debug_struct("ExprPolicyEngine").field("rules", &names).finish()
    }
}

impl ExprPolicyEngine {
    pub fn new<'a>(modules: impl IntoIterator<Item = &'a str>) -> Result<Self, PolicyError> {
        let mut rules = HashMap::new();
        for text in modules {
            let module = Module::parse(text)?;
            for (name, source) in module.rules {
                let key = (module.package.clone(), name);
                if rules.contains_key(&key) {
                    return Err(PolicyError::EvaluationFailed(format!(
                        "rule {}.{} defined in more than one module",
                        key.0, key.1
                    )));
                }
                let rule = PreparedRule {
                    source,
                    tree: OnceCell::new(),
                };
                rules.insert(key, Arc::new(rule));
            }
        }
        Ok(Self { rules })
    }
}

#[async_trait]
impl PolicyEngine for ExprPolicyEngine {
    async fn evaluate(&self, query: &Query, input: Value) -> Result<Vec<Bindings>, PolicyError> {
        let rule = self
            .rules
            .get(&(query.package.clone(), query.rule.clone()))
            .cloned()
            .ok_or_else(|| PolicyError::EvaluationFailed(format!("{query}: no such rule")))?;

        // Signature checks run on the blocking pool.
        let query = query.clone();
        tokio::task::spawn_blocking(move || rule.run(&query, &input))
            .await
            .map_err(|e| PolicyError::EvaluationFailed(format!("evaluation task: {e}")))?
    }
}

fn build_context(input: &Value) -> Result<HashMapContext, PolicyError> {
    let mut ctx: HashMapContext = HashMapContext::new();
    let failed = |e: EvalexprError| PolicyError::EvaluationFailed(format!("context: {e}"));

    ctx.set_function("has_role".to_string(), Function::new(has_role))
        .map_err(failed)?;
    ctx.set_function(
        "jwt_decode_verify".to_string(),
        Function::new(jwt_decode_verify),
    )
    .map_err(failed)?;

    let Value::Object(fields) = input else {
        return Err(PolicyError::EvaluationFailed("input must be an object".into()));
    };
    for (name, value) in fields {
        ctx.set_value(name.clone(), json_to_eval(value)).map_err(failed)?;
    }
    Ok(ctx)
}

fn json_to_eval(value: &Value) -> EvalValue {
    match value {
        Value::Null => EvalValue::Empty,
        Value::Bool(b) => EvalValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                EvalValue::Int(i)
            } else if let Some(f) = n.as_f64() {
                EvalValue::Float(f)
            } else {
                EvalValue::Empty
            }
        }
        Value::String(s) => EvalValue::String(s.clone()),
        Value::Array(items) => EvalValue::Tuple(items.iter().map(json_to_eval).collect()),
        Value::Object(_) => EvalValue::String(value.to_string()),
    }
}

fn eval_to_json(value: &EvalValue) -> Value {
    match value {
        EvalValue::Boolean(b) => Value::Bool(*b),
        EvalValue::Int(i) => Value::from(*i),
        EvalValue::Float(f) => Value::from(*f),
        EvalValue::String(s) => Value::String(s.clone()),
        EvalValue::Tuple(items) => Value::Array(items.iter().map(eval_to_json).collect()),
        EvalValue::Empty => Value::Null,
    }
}

fn arguments(argument: &EvalValue, expected: usize, name: &str) -> Result<Vec<EvalValue>, EvalexprError> {
    let args = argument.as_tuple()?;
    if args.len() != expected {
        return Err(EvalexprError::CustomMessage(format!(
            "{name} takes {expected} arguments, got {}",
            args.len()
        )));
    }
    Ok(args)
}

/// `has_role(roles, role)`
fn has_role(argument: &EvalValue) -> Result<EvalValue, EvalexprError> {
    let args = arguments(argument, 2, "has_role")?;
    let wanted = args[1].as_string()?;
    let found = match &args[0] {
        EvalValue::Tuple(roles) => roles
            .iter()
            .any(|r| matches!(r, EvalValue::String(s) if *s == wanted)),
        EvalValue::String(single) => *single == wanted,
        EvalValue::Empty => false,
        other => {
            return Err(EvalexprError::CustomMessage(format!(
                "has_role expects a tuple of roles, got {other}"
            )));
        }
    };
    Ok(EvalValue::Boolean(found))
}

/// `jwt_decode_verify(token, public_key_pem, issuer)`
///
/// `false` when the token does not verify. Errors only for unusable arguments.
fn jwt_decode_verify(argument: &EvalValue) -> Result<EvalValue, EvalexprError> {
    let args = arguments(argument, 3, "jwt_decode_verify")?;
    let token = args[0].as_string()?;
    let pem = args[1].as_string()?;
    let issuer = args[2].as_string()?;

    let key = DecodingKey::from_rsa_pem(pem.as_bytes())
        .map_err(|e| EvalexprError::CustomMessage(format!("jwt_decode_verify: key: {e}")))?;

    let Ok(header) = jsonwebtoken::decode_header(&token) else {
        return Ok(EvalValue::Boolean(false));
    };
    if !matches!(
        header.alg,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
    ) {
        return Ok(EvalValue::Boolean(false));
    }

    let mut validation = Validation::new(header.alg);
    validation.set_issuer(&[issuer]);
    validation.validate_aud = false;

    let valid = jsonwebtoken::decode::<Value>(&token, &key, &validation).is_ok();
    Ok(EvalValue::Boolean(valid))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn engine(module: &str) -> ExprPolicyEngine {
        ExprPolicyEngine::new([module]).unwrap()
    }

    #[tokio::test]
    async fn binds_x_from_the_input() {
        let engine = engine(
            "package p\n\
             rule admin:\n\
             \x20   x = has_role(Roles, \"ADMIN\")\n",
        );
        let query = Query::new("p", "admin");

        let rows = engine
            .evaluate(&query, json!({ "Roles": ["USER", "ADMIN"] }))
            .await
            .unwrap();
        assert_eq!(rows, vec![Bindings::from([("x".to_string(), json!(true))])]);

        let rows = engine
            .evaluate(&query, json!({ "Roles": ["USER"] }))
            .await
            .unwrap();
        assert_eq!(rows[0]["x"], json!(false));
    }

    #[tokio::test]
    async fn empty_role_set_has_no_roles() {
        let engine = engine("package p\nrule admin:\n x = has_role(Roles, \"ADMIN\")\n");
        let rows = engine
            .evaluate(&Query::new("p", "admin"), json!({ "Roles": [] }))
            .await
            .unwrap();
        assert_eq!(rows[0]["x"], json!(false));
    }

    #[tokio::test]
    async fn rule_with_only_side_assignments_is_undefined() {
        let engine = engine("package p\nrule r:\n y = 1\n");
        let rows = engine.evaluate(&Query::new("p", "r"), json!({})).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn rule_producing_a_value_without_binding_x_yields_a_row_without_it() {
        let engine = engine("package p\nrule r:\n 1 + 1\n");
        let rows = engine.evaluate(&Query::new("p", "r"), json!({})).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].contains_key("x"));
    }

    #[tokio::test]
    async fn unknown_rule_is_an_evaluation_failure() {
        let engine = engine("package p\nrule r:\n x = true\n");
        let err = engine
            .evaluate(&Query::new("p", "missing"), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::EvaluationFailed(_)));
    }

    #[tokio::test]
    async fn broken_rule_fails_on_first_use() {
        let engine = engine("package p\nrule r:\n x = (((\n");
        let err = engine
            .evaluate(&Query::new("p", "r"), json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("compile"));
    }

    #[tokio::test]
    async fn missing_input_field_is_an_evaluation_failure() {
        let engine = engine("package p\nrule r:\n x = Subject == UserID\n");
        let err = engine
            .evaluate(&Query::new("p", "r"), json!({ "Subject": "u-1" }))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::EvaluationFailed(_)));
    }

    #[test]
    fn same_rule_in_two_modules_is_rejected() {
        let a = "package p\nrule r:\n x = true\n";
        assert!(ExprPolicyEngine::new([a, a]).is_err());
    }

    #[test]
    fn query_reads_like_a_data_reference() {
        assert_eq!(
            Query::new("service.policy", "ruleAny").to_string(),
            "x = data.service.policy.ruleAny"
        );
    }
}

//! Policy evaluator adapter.
//!
//! Two independent entry points, one per concern:
//! - authentication: is this token valid for this issuer under this key? (`auth`)
//! - authorization: may these roles act on this user? (`ruleAdminOnly`, ...)
//!
//! Each call builds its own input object and bounds the evaluation by the
//! caller's remaining request budget.
mod engine;
mod module;

use std::{fmt, sync::Arc, time::Duration};

use serde_json::{Value, json};
use thiserror::Error;

pub use engine::{Bindings, ExprPolicyEngine, PolicyEngine, Query};
pub use module::Module;

pub const PACKAGE: &str = "service.policy";

pub const AUTHENTICATION_MODULE: &str = include_str!("authentication.rules");
pub const AUTHORIZATION_MODULE: &str = include_str!("authorization.rules");

#[derive(Debug, Error)]
pub enum PolicyError {
    /// The rule evaluated and said no (or was undefined for this input).
    #[error("policy denied")]
    Denied,
    /// The rule set itself is broken or the engine could not answer.
    #[error("policy evaluation failed: {0}")]
    EvaluationFailed(String),
}

/// Authentication rule name.
pub const AUTHENTICATION_RULE: &str = "auth";

/// Authorization rules selectable per route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Any,
    AdminOnly,
    UserOnly,
    AdminOrSubject,
}

impl Rule {
    pub fn name(self) -> &'static str {
        match self {
            Rule::Any => "ruleAny",
            Rule::AdminOnly => "ruleAdminOnly",
            Rule::UserOnly => "ruleUserOnly",
            Rule::AdminOrSubject => "ruleAdminOrSubject",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone)]
pub struct Policy {
    engine: Arc<dyn PolicyEngine>,
    package: String,
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy").field("package", &self.package).finish()
    }
}

impl Policy {
    pub fn new(engine: Arc<dyn PolicyEngine>) -> Self {
        Self {
            engine,
            package: PACKAGE.to_string(),
        }
    }

    /// Policy over the rule modules compiled into the binary.
    pub fn embedded() -> Result<Self, PolicyError> {
        let engine = ExprPolicyEngine::new([AUTHENTICATION_MODULE, AUTHORIZATION_MODULE])?;
        Ok(Self::new(Arc::new(engine)))
    }

    pub async fn evaluate_authentication(
        &self,
        public_key_pem: &str,
        token: &str,
        issuer: &str,
        budget: Duration,
    ) -> Result<(), PolicyError> {
        let input = json!({
            "Key": public_key_pem,
            "Token": token,
            "ISS": issuer,
        });
        self.evaluate(AUTHENTICATION_RULE, input, budget).await
    }

    pub async fn evaluate_authorization(
        &self,
        rule: Rule,
        roles: &[String],
        subject: &str,
        user_id: &str,
        budget: Duration,
    ) -> Result<(), PolicyError> {
        let input = json!({
            "Roles": roles,
            "Subject": subject,
            "UserID": user_id,
        });
        self.evaluate(rule.name(), input, budget).await
    }

    async fn evaluate(&self, rule: &str, input: Value, budget: Duration) -> Result<(), PolicyError> {
        let query = Query::new(&self.package, rule);

        let rows = tokio::time::timeout(budget, self.engine.evaluate(&query, input))
            .await
            .map_err(|_| PolicyError::EvaluationFailed(format!("{query}: timed out after {budget:?}")))??;

        verdict(&query, rows)
    }
}

fn verdict(query: &Query, rows: Vec<Bindings>) -> Result<(), PolicyError> {
    let row = match rows.as_slice() {
        [] => return Err(PolicyError::Denied),
        [row] => row,
        _ => {
            return Err(PolicyError::EvaluationFailed(format!(
                "{query}: expected one result row, got {}",
                rows.len()
            )));
        }
    };

    match row.get(&query.binding) {
        Some(Value::Bool(true)) => Ok(()),
        Some(Value::Bool(false)) => Err(PolicyError::Denied),
        Some(other) => Err(PolicyError::EvaluationFailed(format!(
            "{query}: binding is not a boolean: {other}"
        ))),
        None => Err(PolicyError::EvaluationFailed(format!(
            "{query}: result has no binding {}",
            query.binding
        ))),
    }
}

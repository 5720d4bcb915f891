//! Allow/Deny decision in the gateway's custom-authorizer response shape.
use std::collections::HashMap;

use serde::Serialize;

pub const POLICY_VERSION: &str = "2012-10-17";
pub const INVOKE_ACTION: &str = "execute-api:Invoke";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub action: Vec<String>,
    pub effect: Effect,
    pub resource: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub principal_id: String,
    pub policy_document: PolicyDocument,
    pub context: HashMap<String, String>,
}

impl PolicyDecision {
    fn build(
        principal_id: &str,
        resource_arn: &str,
        effect: Effect,
        context: HashMap<String, String>,
    ) -> Self {
        Self {
            principal_id: principal_id.to_string(),
            policy_document: PolicyDocument {
                version: POLICY_VERSION.to_string(),
                statement: vec![PolicyStatement {
                    action: vec![INVOKE_ACTION.to_string()],
                    effect,
                    resource: vec![resource_arn.to_string()],
                }],
            },
            context,
        }
    }

    pub fn allow(principal_id: &str, resource_arn: &str, permissions: &[String]) -> Self {
        let context = HashMap::from([
            ("requesterId".to_string(), principal_id.to_string()),
            ("permissions".to_string(), permissions.join(",")),
        ]);
        Self::build(principal_id, resource_arn, Effect::Allow, context)
    }

    pub fn deny(principal_id: &str, resource_arn: &str, message: impl Into<String>) -> Self {
        let context = HashMap::from([("ErrorMessage".to_string(), message.into())]);
        Self::build(principal_id, resource_arn, Effect::Deny, context)
    }

    pub fn effect(&self) -> Effect {
        // Always exactly one statement
        self.policy_document.statement[0].effect
    }
}

//! Tool permission results returned for `can_use_tool` requests

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decision of a permission callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "lowercase")]
pub enum PermissionResult {
    /// Let the tool run, optionally with rewritten input
    Allow {
        /// Replacement tool input; the original input is echoed when unset
        #[serde(rename = "updatedInput", skip_serializing_if = "Option::is_none")]
        updated_input: Option<Value>,

        /// Permission rule updates to apply
        #[serde(rename = "updatedPermissions", skip_serializing_if = "Option::is_none")]
        updated_permissions: Option<Vec<Value>>,
    },

    /// Refuse the tool
    Deny {
        /// Explanation shown to the model
        message: String,

        /// Also interrupt the current turn
        #[serde(default)]
        interrupt: bool,
    },
}

impl PermissionResult {
    /// Allow with the original input
    pub fn allow() -> Self {
        Self::Allow {
            updated_input: None,
            updated_permissions: None,
        }
    }

    /// Allow with rewritten input
    pub fn allow_with_input(input: Value) -> Self {
        Self::Allow {
            updated_input: Some(input),
            updated_permissions: None,
        }
    }

    /// Deny without interrupting
    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
            interrupt: false,
        }
    }

    /// Deny and interrupt the turn
    pub fn deny_and_interrupt(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
            interrupt: true,
        }
    }

    /// Fill in the original input on an allow that carries none
    pub fn with_default_input(self, original: &Value) -> Self {
        match self {
            Self::Allow {
                updated_input: None,
                updated_permissions,
            } => Self::Allow {
                updated_input: Some(original.clone()),
                updated_permissions,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_allow_echoes_original_input() {
        let result = PermissionResult::allow().with_default_input(&json!({"path": "/tmp"}));
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value, json!({"behavior": "allow", "updatedInput": {"path": "/tmp"}}));
    }

    #[test]
    fn test_deny_shape() {
        let value = serde_json::to_value(PermissionResult::deny_and_interrupt("no")).unwrap();
        assert_eq!(value, json!({"behavior": "deny", "message": "no", "interrupt": true}));
    }
}

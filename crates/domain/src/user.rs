//! User account validation and balance holds.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use common::TransactionId;

use crate::codes;
use crate::error::{DomainError, Result};

/// Account standing of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

/// A user account as the directory sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub balance: u32,
    pub status: UserStatus,
    pub purchase_limit: u32,
}

/// Parameters for a validate-and-reserve call.
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub user_id: String,
    pub transaction_id: TransactionId,
    pub required_amount: u32,
}

/// Outcome of a validate-and-reserve call.
///
/// A rejected validation is a business outcome, not an error: the
/// balance is untouched and `reason`/`error_code` explain why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserValidation {
    pub is_valid: bool,
    pub user_id: String,
    pub current_balance: u32,
    pub reason: Option<String>,
    pub error_code: Option<String>,
}

impl UserValidation {
    fn rejected(user_id: &str, balance: u32, reason: &str, code: &str) -> Self {
        Self {
            is_valid: false,
            user_id: user_id.to_string(),
            current_balance: balance,
            reason: Some(reason.to_string()),
            error_code: Some(code.to_string()),
        }
    }
}

/// Validates a user and places a balance hold for one purchase.
#[async_trait]
pub trait UserAccounts: Send + Sync {
    /// Checks the user's standing and, if everything passes, deducts the
    /// required amount from their balance.
    async fn validate_and_reserve(&self, request: ValidationRequest) -> Result<UserValidation>;

    /// Compensating call: restores a previously deducted amount.
    async fn refund(
        &self,
        user_id: &str,
        amount: u32,
        transaction_id: TransactionId,
    ) -> Result<()>;

    /// Returns the user's current profile, if the user exists.
    async fn profile(&self, user_id: &str) -> Option<UserProfile>;
}

#[derive(Debug, Default)]
struct DirectoryState {
    users: HashMap<String, UserProfile>,
    fail_on_validate: bool,
    fail_on_refund: bool,
}

/// In-memory user directory with seeded fixture accounts.
#[derive(Debug, Clone)]
pub struct InMemoryUserDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl Default for InMemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUserDirectory {
    /// Creates a directory seeded with the fixture accounts.
    pub fn new() -> Self {
        let mut users = HashMap::new();
        for profile in [
            UserProfile {
                user_id: "user-123".to_string(),
                balance: 1000,
                status: UserStatus::Active,
                purchase_limit: 500,
            },
            UserProfile {
                user_id: "user-456".to_string(),
                balance: 50,
                status: UserStatus::Active,
                purchase_limit: 100,
            },
            UserProfile {
                user_id: "user-suspended".to_string(),
                balance: 1000,
                status: UserStatus::Suspended,
                purchase_limit: 0,
            },
        ] {
            users.insert(profile.user_id.clone(), profile);
        }

        Self {
            state: Arc::new(RwLock::new(DirectoryState {
                users,
                fail_on_validate: false,
                fail_on_refund: false,
            })),
        }
    }

    /// Forces the next validate calls to fail with a service error.
    pub fn set_fail_on_validate(&self, fail: bool) {
        self.state.write().unwrap().fail_on_validate = fail;
    }

    /// Forces refund calls to fail, simulating a broken compensation.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state.write().unwrap().fail_on_refund = fail;
    }

    /// Returns a user's current balance, if the user exists.
    pub fn balance_of(&self, user_id: &str) -> Option<u32> {
        self.state
            .read()
            .unwrap()
            .users
            .get(user_id)
            .map(|u| u.balance)
    }

    /// Resets a user's balance to a known value.
    pub fn set_balance(&self, user_id: &str, balance: u32) {
        if let Some(user) = self.state.write().unwrap().users.get_mut(user_id) {
            user.balance = balance;
        }
    }
}

#[async_trait]
impl UserAccounts for InMemoryUserDirectory {
    async fn validate_and_reserve(&self, request: ValidationRequest) -> Result<UserValidation> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_validate {
            return Err(DomainError::UserService(
                "user directory unavailable".to_string(),
            ));
        }

        let Some(user) = state.users.get_mut(&request.user_id) else {
            tracing::warn!(user_id = %request.user_id, "user not found");
            return Ok(UserValidation::rejected(
                &request.user_id,
                0,
                "User not found",
                codes::USER_NOT_FOUND,
            ));
        };

        if user.status != UserStatus::Active {
            tracing::warn!(user_id = %request.user_id, status = ?user.status, "user not active");
            return Ok(UserValidation::rejected(
                &request.user_id,
                user.balance,
                "User is not active",
                codes::USER_NOT_ACTIVE,
            ));
        }

        if user.balance < request.required_amount {
            tracing::warn!(
                user_id = %request.user_id,
                required = request.required_amount,
                balance = user.balance,
                "insufficient balance"
            );
            return Ok(UserValidation::rejected(
                &request.user_id,
                user.balance,
                "Insufficient balance",
                codes::INSUFFICIENT_BALANCE,
            ));
        }

        if request.required_amount > user.purchase_limit {
            tracing::warn!(
                user_id = %request.user_id,
                limit = user.purchase_limit,
                required = request.required_amount,
                "purchase limit exceeded"
            );
            return Ok(UserValidation::rejected(
                &request.user_id,
                user.balance,
                "Purchase limit exceeded",
                codes::PURCHASE_LIMIT_EXCEEDED,
            ));
        }

        user.balance -= request.required_amount;
        tracing::debug!(
            user_id = %request.user_id,
            transaction_id = %request.transaction_id,
            remaining = user.balance,
            "balance hold placed"
        );

        Ok(UserValidation {
            is_valid: true,
            user_id: request.user_id,
            current_balance: user.balance,
            reason: None,
            error_code: None,
        })
    }

    async fn refund(
        &self,
        user_id: &str,
        amount: u32,
        transaction_id: TransactionId,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_refund {
            return Err(DomainError::UserService(
                "refund channel unavailable".to_string(),
            ));
        }

        let Some(user) = state.users.get_mut(user_id) else {
            return Err(DomainError::CompensationTargetMissing(format!(
                "user {user_id}"
            )));
        };

        user.balance += amount;
        tracing::debug!(
            user_id,
            amount,
            %transaction_id,
            restored = user.balance,
            "balance hold refunded"
        );
        Ok(())
    }

    async fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.state.read().unwrap().users.get(user_id).cloned()
    }
}

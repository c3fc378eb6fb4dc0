#![allow(dead_code)]
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{ConfirmOutcome, MembershipError, MembershipService};
use crate::models::account::Account;

/// Scripted in-memory membership backend for tests.
///
/// `confirm_checkout` pops results off `confirm_script`; once the script is
/// exhausted every further call behaves like a backend returning a malformed
/// body, which keeps "endpoint that never recovers" scenarios one-liners.
#[derive(Default)]
pub struct MockMembershipService {
    pub account: Mutex<Option<Account>>,
    pub session_email: Mutex<Option<String>>,
    pub fail_session_lookup: bool,
    pub confirm_script: Mutex<VecDeque<Result<ConfirmOutcome, MembershipError>>>,
    pub confirm_calls: Mutex<Vec<String>>,
    pub lookup_calls: Mutex<Vec<String>>,
    pub account_calls: Mutex<Vec<Uuid>>,
}

impl MockMembershipService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_confirm(
        &self,
        outcomes: impl IntoIterator<Item = Result<ConfirmOutcome, MembershipError>>,
    ) {
        self.confirm_script.lock().unwrap().extend(outcomes);
    }

    pub fn confirm_call_count(&self) -> usize {
        self.confirm_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MembershipService for MockMembershipService {
    async fn fetch_account(&self, user_id: Uuid) -> Result<Account, MembershipError> {
        self.account_calls.lock().unwrap().push(user_id);
        self.account
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| MembershipError::Api {
                status: 404,
                message: "no such account".to_string(),
            })
    }

    async fn confirm_checkout(
        &self,
        session_id: &str,
    ) -> Result<ConfirmOutcome, MembershipError> {
        self.confirm_calls
            .lock()
            .unwrap()
            .push(session_id.to_string());
        self.confirm_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(MembershipError::Malformed(
                    "mock confirmation body was not understood".to_string(),
                ))
            })
    }

    async fn lookup_session_email(
        &self,
        session_id: &str,
    ) -> Result<Option<String>, MembershipError> {
        self.lookup_calls
            .lock()
            .unwrap()
            .push(session_id.to_string());
        if self.fail_session_lookup {
            return Err(MembershipError::Api {
                status: 404,
                message: "unknown checkout session".to_string(),
            });
        }
        Ok(self.session_email.lock().unwrap().clone())
    }
}

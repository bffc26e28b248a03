use chrono::{DateTime, NaiveDate, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// identity of the operator driving the console session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: Uuid,
    pub name: String,
}

/// opaque bearer credentials forwarded to the backend
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(***)")
    }
}

/// execution context threaded through every fee operation
///
/// Carries the operator identity, the backend credentials and the clock. Nothing in the
/// crate reads session state from anywhere else.
pub struct ExecutionContext {
    operator: Operator,
    credentials: Credentials,
    time: SafeTimeProvider,
}

impl ExecutionContext {
    pub fn new(operator: Operator, credentials: Credentials, time: SafeTimeProvider) -> Self {
        Self {
            operator,
            credentials,
            time,
        }
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn operator_id(&self) -> Uuid {
        self.operator.id
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn time(&self) -> &SafeTimeProvider {
        &self.time
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.time.now().date_naive()
    }
}

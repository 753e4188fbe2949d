//! What a store needs to know about the request it is writing for.

use std::fmt::Debug;

/// Request facts recorded alongside each session row.
pub trait RequestContext: Debug + Send + Sync + 'static {
    /// Network address of the client.
    fn client_address(&self) -> String;

    /// The client's `User-Agent` header, or an empty string.
    fn user_agent(&self) -> String;

    /// The authenticated user, when the application knows one.
    fn user_id(&self) -> Option<i64> {
        None
    }
}

/// A request context built from plain values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticContext {
    pub client_address: String,
    pub user_agent: String,
    pub user_id: Option<i64>,
}

impl StaticContext {
    pub fn new(client_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            client_address: client_address.into(),
            user_agent: user_agent.into(),
            user_id: None,
        }
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

impl RequestContext for StaticContext {
    fn client_address(&self) -> String {
        self.client_address.clone()
    }

    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn user_id(&self) -> Option<i64> {
        self.user_id
    }
}

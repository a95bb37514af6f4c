//! Account aggregate.
//!
//! `AccountCreated` is the system-root event: it is the only event in the
//! kernel stamped without a blueprint. Every later account event is stamped
//! with the account's own id, which is also the blueprint of the workspaces
//! the account owns.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};
use crate::events::{
    AggregateRoot, AggregateState, CausalityContext, DomainEvent, EventPayload, EventServices,
};

pub const ACCOUNT_AGGREGATE: &str = "Account";

pub type Account = AggregateRoot<AccountState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data")]
pub enum AccountEvent {
    #[serde(rename_all = "camelCase")]
    AccountCreated { email: String, display_name: String },
    #[serde(rename_all = "camelCase")]
    AccountRenamed { display_name: String },
    AccountSuspended { reason: String },
    AccountReactivated {},
}

impl EventPayload for AccountEvent {
    const EVENT_TYPES: &'static [&'static str] = &[
        "AccountCreated",
        "AccountRenamed",
        "AccountSuspended",
        "AccountReactivated",
    ];

    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountCreated { .. } => "AccountCreated",
            AccountEvent::AccountRenamed { .. } => "AccountRenamed",
            AccountEvent::AccountSuspended { .. } => "AccountSuspended",
            AccountEvent::AccountReactivated {} => "AccountReactivated",
        }
    }

    fn is_root_event(&self) -> bool {
        matches!(self, AccountEvent::AccountCreated { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountState {
    pub status: Option<AccountStatus>,
    pub email: String,
    pub display_name: String,
    pub suspension_reason: Option<String>,
}

impl AggregateState for AccountState {
    const AGGREGATE_TYPE: &'static str = ACCOUNT_AGGREGATE;
    type Event = AccountEvent;

    fn apply(&mut self, event: &DomainEvent<AccountEvent>) {
        match event.data() {
            AccountEvent::AccountCreated {
                email,
                display_name,
            } => {
                self.status = Some(AccountStatus::Active);
                self.email = email.clone();
                self.display_name = display_name.clone();
            }
            AccountEvent::AccountRenamed { display_name } => {
                self.display_name = display_name.clone();
            }
            AccountEvent::AccountSuspended { reason } => {
                self.status = Some(AccountStatus::Suspended);
                self.suspension_reason = Some(reason.clone());
            }
            AccountEvent::AccountReactivated {} => {
                self.status = Some(AccountStatus::Active);
                self.suspension_reason = None;
            }
        }
    }
}

impl Account {
    /// Register an account. The creating actor is usually the account itself.
    pub fn create(
        services: &EventServices,
        context: &CausalityContext,
        id: &str,
        email: &str,
        display_name: &str,
    ) -> Result<Self> {
        if id.trim().is_empty() {
            return Err(KernelError::missing_field("accountId"));
        }
        if !email.contains('@') {
            return Err(KernelError::validation("Email address is invalid"));
        }
        if display_name.trim().is_empty() {
            return Err(KernelError::missing_field("displayName"));
        }

        let mut account = Self::new(id);
        account.raise_event_in(
            services,
            context,
            None,
            AccountEvent::AccountCreated {
                email: email.trim().to_lowercase(),
                display_name: display_name.trim().to_string(),
            },
        )?;
        Ok(account)
    }

    pub fn rename(
        &mut self,
        services: &EventServices,
        context: &CausalityContext,
        display_name: &str,
    ) -> Result<()> {
        self.require_status()?;
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(KernelError::missing_field("displayName"));
        }
        self.raise_owned(
            services,
            context,
            AccountEvent::AccountRenamed {
                display_name: display_name.to_string(),
            },
        )
    }

    /// `active → suspended`.
    pub fn suspend(
        &mut self,
        services: &EventServices,
        context: &CausalityContext,
        reason: &str,
    ) -> Result<()> {
        if self.require_status()? == AccountStatus::Suspended {
            return Err(self.rejected("Account is already suspended"));
        }
        if reason.trim().is_empty() {
            return Err(KernelError::missing_field("reason"));
        }
        self.raise_owned(
            services,
            context,
            AccountEvent::AccountSuspended {
                reason: reason.trim().to_string(),
            },
        )
    }

    /// `suspended → active`.
    pub fn reactivate(&mut self, services: &EventServices, context: &CausalityContext) -> Result<()> {
        if self.require_status()? == AccountStatus::Active {
            return Err(self.rejected("Account is already active"));
        }
        self.raise_owned(services, context, AccountEvent::AccountReactivated {})
    }

    /// Raise an event inside the account's own blueprint.
    fn raise_owned(
        &mut self,
        services: &EventServices,
        context: &CausalityContext,
        event: AccountEvent,
    ) -> Result<()> {
        let blueprint = self.id().to_string();
        self.raise_event_in(services, context, Some(&blueprint), event)?;
        Ok(())
    }

    fn require_status(&self) -> Result<AccountStatus> {
        self.status
            .ok_or_else(|| self.rejected("Account is not initialized"))
    }

    fn rejected(&self, message: impl Into<String>) -> KernelError {
        KernelError::invalid_state_transition(ACCOUNT_AGGREGATE, self.id(), message)
    }
}

//! Identity, request and patch types of subscriptions.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::ConnectionId;
use crate::error::NotifyError;
use crate::events::UpdateKind;
use crate::filters::{Combinator, Filter, PredicateSpec};
use crate::pipeline::BatchPolicy;
use crate::policies::RetryPolicy;

/// Globally unique subscription id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SubscriptionId {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| NotifyError::validation(format!("invalid subscription id `{s}`")))
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    ModelUpdate,
    ProviderUpdate,
    CapabilityUpdate,
    AllUpdates,
}

impl SubscriptionType {
    /// Whether events of `kind` are routed to this type.
    pub fn accepts(&self, kind: UpdateKind) -> bool {
        match self {
            SubscriptionType::AllUpdates => true,
            SubscriptionType::ModelUpdate => kind == UpdateKind::ModelUpdate,
            SubscriptionType::ProviderUpdate => kind == UpdateKind::ProviderUpdate,
            SubscriptionType::CapabilityUpdate => kind == UpdateKind::CapabilityUpdate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionType::ModelUpdate => "model_update",
            SubscriptionType::ProviderUpdate => "provider_update",
            SubscriptionType::CapabilityUpdate => "capability_update",
            SubscriptionType::AllUpdates => "all_updates",
        }
    }
}

impl From<UpdateKind> for SubscriptionType {
    fn from(kind: UpdateKind) -> Self {
        match kind {
            UpdateKind::ModelUpdate => SubscriptionType::ModelUpdate,
            UpdateKind::ProviderUpdate => SubscriptionType::ProviderUpdate,
            UpdateKind::CapabilityUpdate => SubscriptionType::CapabilityUpdate,
        }
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionType {
    type Err = NotifyError;

    /// Accepts snake, kebab and camel case (`all_updates`, `all-updates`, `allUpdates`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match norm.as_str() {
            "modelupdate" => Ok(SubscriptionType::ModelUpdate),
            "providerupdate" => Ok(SubscriptionType::ProviderUpdate),
            "capabilityupdate" => Ok(SubscriptionType::CapabilityUpdate),
            "allupdates" => Ok(SubscriptionType::AllUpdates),
            _ => Err(NotifyError::validation(format!("unknown subscription type `{s}`"))),
        }
    }
}

/// Active or paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
}

/// Per-subscription overrides of the engine delivery defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    pub batch_size: Option<usize>,
    pub batch_timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    /// Base delay of the retry backoff.
    pub retry_delay: Option<Duration>,
}

impl SubscriptionOptions {
    /// Field-wise overlay: values set in `patch` win.
    pub fn merged(self, patch: SubscriptionOptions) -> Self {
        Self {
            batch_size: patch.batch_size.or(self.batch_size),
            batch_timeout: patch.batch_timeout.or(self.batch_timeout),
            max_retries: patch.max_retries.or(self.max_retries),
            retry_delay: patch.retry_delay.or(self.retry_delay),
        }
    }

    pub fn validate(&self) -> Result<(), NotifyError> {
        if self.batch_size == Some(0) {
            return Err(NotifyError::validation("batch_size must be at least 1"));
        }
        Ok(())
    }
}

/// Effective delivery settings of one subscription.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliveryTunables {
    pub batch: BatchPolicy,
    pub retry: RetryPolicy,
}

/// Input of `NotificationEngine::subscribe`.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub client_id: String,
    pub kind: SubscriptionType,
    pub filter: Filter,
    /// Connection batches are delivered to; required.
    pub target: Option<ConnectionId>,
    pub options: SubscriptionOptions,
}

impl SubscribeRequest {
    /// Request with no filter, no target and default options.
    pub fn new(client_id: impl Into<String>, kind: SubscriptionType) -> Self {
        Self {
            client_id: client_id.into(),
            kind,
            filter: Filter::none(),
            target: None,
            options: SubscriptionOptions::default(),
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn to(mut self, target: impl Into<ConnectionId>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_options(mut self, options: SubscriptionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Replacement filter carried by a [`SubscriptionUpdate`].
#[derive(Debug, Clone)]
pub enum FilterPatch {
    /// Already compiled.
    Compiled(Filter),
    /// Compiled (and validated) when the update is applied.
    Specs {
        combinator: Combinator,
        specs: Vec<PredicateSpec>,
    },
}

impl FilterPatch {
    pub(crate) fn compile(self) -> Result<Filter, NotifyError> {
        match self {
            FilterPatch::Compiled(f) => Ok(f),
            FilterPatch::Specs { combinator, specs } => Filter::from_specs(combinator, &specs),
        }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    pub filter: Option<FilterPatch>,
    pub target: Option<ConnectionId>,
    pub options: Option<SubscriptionOptions>,
}

impl SubscriptionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(FilterPatch::Compiled(filter));
        self
    }

    pub fn filter_specs(mut self, combinator: Combinator, specs: Vec<PredicateSpec>) -> Self {
        self.filter = Some(FilterPatch::Specs { combinator, specs });
        self
    }

    pub fn target(mut self, target: impl Into<ConnectionId>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn options(mut self, options: SubscriptionOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filter.is_none() && self.target.is_none() && self.options.is_none()
    }
}

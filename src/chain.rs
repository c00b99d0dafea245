//! Chain-of-responsibility coordinator over unsubscribe strategies.
//!
//! Strategies run strictly in registration order. The first capable one is
//! executed; its outcome is audited; success ends the run, failure moves on.
//! If nothing succeeds the sender is upserted into the must-delete list with
//! the last failure message.
//!
//! [`StrategyChain::execute`] never fails and never panics on behalf of a
//! strategy: internal errors and panics become failed outcomes.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::candidate::{AttemptRecord, ChainOutcome, UnsubscribeCandidate};
use crate::gate::ConcurrencyGate;
use crate::store::{AccountStore, AuditSink, MustDeleteStore, SecretDecryptor};
use crate::strategies::direct_link::{DirectLinkSettings, DirectLinkStrategy};
use crate::strategies::header_link::{HeaderLinkSettings, HeaderLinkStrategy};
use crate::strategies::mail_fallback::{
    MailFallbackSettings, MailFallbackStrategy, MailSubmitter,
};
use crate::strategies::{truncate_message, StrategyError, StrategyOutcome, UnsubscribeStrategy};

/// Reason stored when no strategy could handle the candidate.
pub const NO_CAPABLE_STRATEGY: &str = "No capable unsubscribe strategy for this sender";

/// Ordered strategy list plus the audit and must-delete collaborators.
pub struct StrategyChain {
    strategies: Vec<Arc<dyn UnsubscribeStrategy>>,
    audit: Arc<dyn AuditSink>,
    must_delete: Arc<dyn MustDeleteStore>,
}

impl StrategyChain {
    /// Empty chain writing to the given collaborators.
    pub fn new(audit: Arc<dyn AuditSink>, must_delete: Arc<dyn MustDeleteStore>) -> Self {
        Self {
            strategies: Vec::new(),
            audit,
            must_delete,
        }
    }

    /// Append a strategy. Registration order is the only priority.
    pub fn add_strategy(&mut self, strategy: Arc<dyn UnsubscribeStrategy>) -> &mut Self {
        debug!(strategy = strategy.name(), "strategy registered");
        self.strategies.push(strategy);
        self
    }

    /// Registered strategy names, in order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the chain for one candidate.
    pub async fn execute(&self, candidate: &UnsubscribeCandidate) -> ChainOutcome {
        let shared = Arc::new(candidate.clone());
        let mut last_failure: Option<String> = None;

        for strategy in &self.strategies {
            if !check_capability(strategy.as_ref(), &shared) {
                continue;
            }

            let name = strategy.name();
            debug!(strategy = name, sender = %shared.sender, "executing strategy");
            let outcome = run_isolated(Arc::clone(strategy), Arc::clone(&shared)).await;
            self.record_attempt(&shared.sender, name, &outcome).await;

            if outcome.success {
                info!(strategy = name, sender = %shared.sender, "unsubscribed");
                return ChainOutcome::succeeded(name, outcome.message);
            }

            warn!(
                strategy = name,
                sender = %shared.sender,
                reason = %outcome.message,
                "strategy failed"
            );
            if !outcome.message.trim().is_empty() {
                last_failure = Some(outcome.message);
            }
        }

        let reason = last_failure.unwrap_or_else(|| NO_CAPABLE_STRATEGY.to_owned());
        if let Err(e) = self
            .must_delete
            .add_to_must_delete(&shared.sender, &reason)
            .await
        {
            error!(error = %e, sender = %shared.sender, "failed to add sender to must-delete list");
        }
        info!(sender = %shared.sender, reason = %reason, "all strategies exhausted");
        ChainOutcome::exhausted(reason)
    }

    async fn record_attempt(&self, sender: &str, strategy: &str, outcome: &StrategyOutcome) {
        let record = AttemptRecord::now(sender, strategy, outcome.success, &outcome.message);
        if let Err(e) = self.audit.log_unsubscribe_attempt(&record).await {
            warn!(error = %e, strategy, sender, "failed to write unsubscribe audit record");
        }
    }
}

/// `can_handle`, with a panic treated as "cannot handle".
fn check_capability(strategy: &dyn UnsubscribeStrategy, candidate: &UnsubscribeCandidate) -> bool {
    match catch_unwind(AssertUnwindSafe(|| strategy.can_handle(candidate))) {
        Ok(capable) => capable,
        Err(_) => {
            warn!(
                strategy = strategy.name(),
                "capability check panicked; skipping strategy"
            );
            false
        }
    }
}

/// Execute on a separate task so a panic surfaces as a `JoinError`.
async fn run_isolated(
    strategy: Arc<dyn UnsubscribeStrategy>,
    candidate: Arc<UnsubscribeCandidate>,
) -> StrategyOutcome {
    let handle = tokio::spawn(async move { strategy.execute(&candidate).await });
    match handle.await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => strategy_error(&e),
        Err(join) => {
            let detail = if join.is_panic() {
                panic_message(join.into_panic())
            } else {
                "task cancelled".to_owned()
            };
            StrategyOutcome::failure(format!("Strategy error: {}", truncate_message(&detail)))
        }
    }
}

fn strategy_error(err: &StrategyError) -> StrategyOutcome {
    StrategyOutcome::failure(format!(
        "Strategy error: {}",
        truncate_message(&err.to_string())
    ))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_owned()
    }
}

/// Collaborators and settings for [`standard_chain`].
pub struct ChainDependencies {
    /// Shared concurrency gate for direct-link requests.
    pub gate: Arc<ConcurrencyGate>,
    /// Audit trail.
    pub audit: Arc<dyn AuditSink>,
    /// Must-delete worklist.
    pub must_delete: Arc<dyn MustDeleteStore>,
    /// Outbound account lookup.
    pub accounts: Arc<dyn AccountStore>,
    /// Credential decryption.
    pub secrets: Arc<dyn SecretDecryptor>,
    /// Mail submission.
    pub submitter: Arc<dyn MailSubmitter>,
    /// Header-link settings.
    pub header_link: HeaderLinkSettings,
    /// Direct-link settings.
    pub direct_link: DirectLinkSettings,
    /// Mail-fallback settings.
    pub mail_fallback: MailFallbackSettings,
}

/// Build the standard chain: header link, direct link, mail fallback.
///
/// # Errors
///
/// Returns [`StrategyError::HttpClient`] if an HTTP client cannot be built.
pub fn standard_chain(deps: ChainDependencies) -> Result<StrategyChain, StrategyError> {
    let mut chain = StrategyChain::new(deps.audit, deps.must_delete);
    chain
        .add_strategy(Arc::new(HeaderLinkStrategy::new(deps.header_link)?))
        .add_strategy(Arc::new(DirectLinkStrategy::new(
            deps.gate,
            deps.direct_link,
        )))
        .add_strategy(Arc::new(MailFallbackStrategy::new(
            deps.accounts,
            deps.secrets,
            deps.submitter,
            deps.mail_fallback,
        )));
    Ok(chain)
}

//! Main settlement engine
//!
//! Orchestrates purchases, tips and cashouts against the token ledger. Every
//! balance change runs inside one ledger unit of work; collaborator calls
//! (payment gateway, content directory) happen before any lock is taken.

use crate::{
    config::Config,
    content::ContentDirectory,
    error::invalid_amount,
    gateway::{IntentRequest, PaymentGateway},
    metrics::Metrics,
    payout,
    types::*,
    webhook::PurchaseMetadata,
    Result, SettlementError,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use token_ledger::{
    BalanceDelta, BalanceStore, ConservationReport, ContentId, NewTransaction, TokenLedger,
    Transaction, TransactionId, TransactionJournal, TransactionStatus, TransactionType, UnitOfWork,
    UserId,
};

/// Outcome of crediting a purchase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    /// Tokens credited now
    Credited(Transaction),
    /// Already credited by an earlier notification
    AlreadyCompleted(Transaction),
}

/// Settlement engine
pub struct SettlementEngine {
    /// Token ledger
    ledger: Arc<TokenLedger>,

    /// Payment processor
    gateway: Arc<dyn PaymentGateway>,

    /// Content lookup
    directory: Arc<dyn ContentDirectory>,

    /// Prometheus collectors
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for SettlementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngine")
            .field("ledger", &self.ledger)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SettlementEngine {
    /// Create engine over an open ledger
    pub fn new(
        config: Config,
        ledger: Arc<TokenLedger>,
        gateway: Arc<dyn PaymentGateway>,
        directory: Arc<dyn ContentDirectory>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = Metrics::new()
            .map_err(|e| SettlementError::Config(format!("Failed to register metrics: {}", e)))?;

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            tokens_per_dollar = config.economics.tokens_per_dollar,
            "Settlement engine ready"
        );

        Ok(Self {
            ledger,
            gateway,
            directory,
            metrics,
            config,
        })
    }

    /// Open the ledger in `config.ledger_data_dir` and create the engine
    pub fn open(
        config: Config,
        gateway: Arc<dyn PaymentGateway>,
        directory: Arc<dyn ContentDirectory>,
    ) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(TokenLedger::open(&config.ledger_config())?);
        Self::new(config, ledger, gateway, directory)
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Underlying ledger
    pub fn ledger(&self) -> &Arc<TokenLedger> {
        &self.ledger
    }

    /// Start a token purchase
    ///
    /// Asks the processor for a payment intent, then records a pending
    /// purchase under the intent's reference. No tokens move until the
    /// processor confirms payment.
    pub async fn create_purchase_intent(
        &self,
        user_id: UserId,
        usd: Decimal,
    ) -> Result<PurchaseIntent> {
        if usd <= Decimal::ZERO {
            return Err(invalid_amount(usd));
        }

        let tokens_per_dollar = self.config.economics.tokens_per_dollar;
        let tokens = payout::tokens_for_usd(usd, tokens_per_dollar)?;
        if tokens == 0 {
            return Err(SettlementError::InvalidAmount(format!(
                "{} USD buys no tokens",
                usd
            )));
        }

        let request = IntentRequest {
            amount_cents: payout::usd_to_cents(usd)?,
            currency: self.config.economics.currency.clone(),
            user_id,
            tokens,
        };

        let intent = self
            .gateway
            .create_intent(&request)
            .await
            .map_err(|err| match err {
                SettlementError::PaymentIntentFailed(_) => err,
                other => SettlementError::PaymentIntentFailed(other.to_string()),
            })?;

        let reference = intent.external_reference.clone();
        let purchase = self
            .transact(vec![user_id], move |uow| {
                uow.get(user_id)?;
                Ok(uow.append(NewTransaction::purchase(user_id, tokens, reference))?)
            })
            .await?;

        self.metrics.purchases_initiated.inc();
        tracing::info!(
            user_id = %user_id,
            tokens,
            reference = %intent.external_reference,
            tx_id = %purchase.id,
            "Purchase intent created"
        );

        Ok(PurchaseIntent {
            tokens,
            payment_handle: intent.client_secret,
            external_reference: intent.external_reference,
            transaction_id: purchase.id,
        })
    }

    /// Run a ledger unit of work on the blocking pool
    ///
    /// Lock waits and synced writes never park an async worker.
    async fn transact<R, F>(&self, users: Vec<UserId>, work: F) -> Result<R>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        tokio::task::spawn_blocking(move || ledger.transact(&users, work))
            .await
            .map_err(|err| SettlementError::Worker(err.to_string()))?
    }

    /// Credit a paid purchase exactly once
    ///
    /// Blocks on the ledger; async callers run it on the blocking pool.
    ///
    /// `user_id` and `tokens` come from the notification and must agree with
    /// the stored purchase.
    pub fn credit_purchase(
        &self,
        external_reference: &str,
        user_id: UserId,
        tokens: i64,
    ) -> Result<CreditOutcome> {
        let purchase = self.find_purchase(external_reference)?;
        check_notification(&purchase, user_id, tokens)?;

        let owner = purchase.user_id;
        let outcome = self.ledger.transact(&[owner], |uow| -> Result<_> {
            // Re-read under the owner's lock: a concurrent duplicate may have won
            let current = uow.transaction(purchase.id)?;
            match current.status {
                TransactionStatus::Completed => Ok(CreditOutcome::AlreadyCompleted(current)),
                TransactionStatus::Pending => {
                    uow.apply_delta(owner, current.amount, BalanceDelta::NONE)?;
                    let credited = uow.transition(current.id, TransactionStatus::Completed)?;
                    Ok(CreditOutcome::Credited(credited))
                }
                TransactionStatus::Failed | TransactionStatus::Cancelled => Err(
                    SettlementError::UnknownOrTerminatedTransaction(external_reference.to_string()),
                ),
            }
        });

        match &outcome {
            Ok(CreditOutcome::Credited(tx)) => {
                self.metrics.purchases_credited.inc();
                tracing::info!(
                    user_id = %owner,
                    tokens = tx.amount,
                    reference = external_reference,
                    tx_id = %tx.id,
                    "Purchase credited"
                );
            }
            Ok(CreditOutcome::AlreadyCompleted(tx)) => {
                self.metrics.duplicate_notifications.inc();
                tracing::warn!(
                    reference = external_reference,
                    tx_id = %tx.id,
                    "Duplicate payment notification ignored"
                );
            }
            Err(_) => {}
        }

        outcome.map_err(SettlementError::logged)
    }

    /// Close a pending purchase as failed or cancelled
    ///
    /// Repeating the same close is a no-op; closing a purchase already in a
    /// different terminal status is rejected. When the notification echoes
    /// purchase metadata it must agree with the stored purchase.
    pub fn close_purchase(
        &self,
        external_reference: &str,
        status: TransactionStatus,
        metadata: Option<PurchaseMetadata>,
    ) -> Result<Transaction> {
        if !matches!(
            status,
            TransactionStatus::Failed | TransactionStatus::Cancelled
        ) {
            return Err(SettlementError::Ledger(
                token_ledger::Error::InvalidTransaction(format!(
                    "purchase cannot be closed as {}",
                    status
                )),
            ));
        }

        let purchase = self.find_purchase(external_reference)?;
        if let Some(metadata) = metadata {
            check_notification(&purchase, metadata.user_id, metadata.tokens)?;
        }

        let closed = self.ledger.transact(&[purchase.user_id], |uow| -> Result<_> {
            let current = uow.transaction(purchase.id)?;
            if current.status == status {
                return Ok(current);
            }
            if current.status != TransactionStatus::Pending {
                return Err(SettlementError::UnknownOrTerminatedTransaction(
                    external_reference.to_string(),
                ));
            }
            Ok(uow.transition(current.id, status)?)
        });

        let closed = closed.map_err(SettlementError::logged)?;
        tracing::info!(
            user_id = %closed.user_id,
            reference = external_reference,
            status = %closed.status,
            "Purchase closed"
        );
        Ok(closed)
    }

    fn find_purchase(&self, external_reference: &str) -> Result<Transaction> {
        match self.ledger.find_by_external_reference(external_reference)? {
            Some(tx) if tx.tx_type == TransactionType::Purchase => Ok(tx),
            _ => Err(SettlementError::UnknownOrTerminatedTransaction(
                external_reference.to_string(),
            )
            .logged()),
        }
    }

    /// Tip the creator of a piece of content
    pub async fn tip(
        &self,
        tipper: UserId,
        content_id: ContentId,
        amount: i64,
    ) -> Result<TipReceipt> {
        if amount <= 0 {
            return Err(invalid_amount(amount));
        }

        let target = self
            .directory
            .resolve(content_id)
            .await
            .ok_or(SettlementError::TargetNotFound(content_id.get()))?;
        let creator = target
            .tippable_creator()
            .ok_or(SettlementError::TargetNotFound(content_id.get()))?;

        if creator == tipper {
            return Err(SettlementError::SelfTipNotAllowed);
        }

        let (debit, credit, new_balance) = self
            .transact(vec![tipper, creator], move |uow| {
                let after = uow.apply_delta(tipper, -amount, BalanceDelta::spent(amount))?;
                uow.apply_delta(creator, amount, BalanceDelta::earned(amount))?;
                let debit = uow.append(NewTransaction::tip(tipper, -amount, creator, content_id))?;
                let credit = uow.append(NewTransaction::tip(creator, amount, tipper, content_id))?;
                Ok((debit.id, credit.id, after.balance))
            })
            .await?;

        self.metrics.tips.inc();
        self.metrics.tipped_tokens.inc_by(amount.unsigned_abs());
        tracing::info!(
            tipper = %tipper,
            creator = %creator,
            content_id = content_id.get(),
            amount,
            "Tip committed"
        );

        Ok(TipReceipt {
            new_balance,
            recipient_id: creator,
            recipient_name: target.creator_name,
            debit_transaction_id: debit,
            credit_transaction_id: credit,
        })
    }

    /// Cash tokens out at the creator's current payout rate
    ///
    /// The debit is taken immediately and the cashout stays pending until
    /// [`settle_cashout`](Self::settle_cashout) confirms it.
    pub async fn cashout(&self, creator: UserId, tokens: i64) -> Result<CashoutReceipt> {
        if tokens <= 0 {
            return Err(invalid_amount(tokens));
        }
        let minimum = self.config.economics.min_cashout_tokens;
        if tokens < minimum {
            return Err(SettlementError::BelowMinimum {
                minimum,
                requested: tokens,
            });
        }

        let followers = self.directory.follower_count(creator).await;
        let tokens_per_dollar = self.config.economics.tokens_per_dollar;

        let policy = self.config.payout.clone();
        let (cashout, rate, new_balance) = self
            .transact(vec![creator], move |uow| {
                let current = uow.get(creator)?;
                let rate = policy.rate(current.total_earned, followers);
                let after = uow.apply_delta(creator, -tokens, BalanceDelta::spent(tokens))?;
                let cashout = uow.append(NewTransaction::cashout(creator, tokens))?;
                Ok((cashout, rate, after.balance))
            })
            .await?;

        let payout_usd = payout::payout_usd(tokens, rate, tokens_per_dollar);

        self.metrics.cashouts.inc();
        tracing::info!(
            user_id = %creator,
            tokens,
            %rate,
            %payout_usd,
            tx_id = %cashout.id,
            "Cashout requested"
        );

        Ok(CashoutReceipt {
            transaction_id: cashout.id,
            tokens,
            payout_usd,
            rate,
            status: cashout.status,
            new_balance,
        })
    }

    /// Record the payout collaborator's confirmation for a cashout
    ///
    /// A failed or cancelled payout returns the tokens with a completed refund
    /// row in the same unit of work. Lifetime spent is left as is.
    pub fn settle_cashout(
        &self,
        transaction_id: TransactionId,
        outcome: PayoutOutcome,
    ) -> Result<CashoutSettlement> {
        let cashout = self.ledger.transaction(transaction_id)?;
        if cashout.tx_type != TransactionType::Cashout {
            return Err(SettlementError::NotCashout(transaction_id));
        }

        let user_id = cashout.user_id;
        let settlement = self.ledger.transact(&[user_id], |uow| -> Result<_> {
            let current = uow.transaction(transaction_id)?;
            if current.status.is_terminal() {
                return Err(SettlementError::AlreadySettled {
                    id: transaction_id,
                    status: current.status,
                });
            }

            let settled = uow.transition(transaction_id, outcome.status())?;
            let (refund_transaction_id, new_balance) = match outcome {
                PayoutOutcome::Paid => (None, uow.get(user_id)?.balance),
                PayoutOutcome::Failed | PayoutOutcome::Cancelled => {
                    let tokens = -settled.amount;
                    let after = uow.apply_delta(user_id, tokens, BalanceDelta::NONE)?;
                    let refund = uow.append(NewTransaction::refund(user_id, tokens))?;
                    (Some(refund.id), after.balance)
                }
            };

            Ok(CashoutSettlement {
                cashout: settled,
                refund_transaction_id,
                new_balance,
            })
        })?;

        if settlement.refund_transaction_id.is_some() {
            self.metrics.cashout_compensations.inc();
        }
        tracing::info!(
            user_id = %user_id,
            tx_id = %transaction_id,
            status = %settlement.cashout.status,
            refunded = settlement.refund_transaction_id.is_some(),
            "Cashout settled"
        );

        Ok(settlement)
    }

    /// Balance and lifetime counters
    pub fn get_balance(&self, user_id: UserId) -> Result<BalanceView> {
        Ok(self.ledger.balance(user_id)?.into())
    }

    /// A user's transactions, newest first
    ///
    /// `limit` defaults to the configured page size.
    pub fn list_transactions(
        &self,
        user_id: UserId,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let limit = limit.unwrap_or(self.config.economics.default_page_size);
        Ok(self.ledger.list_transactions(user_id, limit, offset)?)
    }

    /// Recompute a user's balance from the ledger
    pub fn verify_conservation(&self, user_id: UserId) -> Result<ConservationReport> {
        let report = self.ledger.verify_conservation(user_id)?;
        if !report.holds() {
            tracing::error!(user_id = %user_id, report = ?report, "Conservation violated");
        }
        Ok(report)
    }
}

fn check_notification(purchase: &Transaction, user_id: UserId, tokens: i64) -> Result<()> {
    if purchase.user_id == user_id && purchase.amount == tokens {
        return Ok(());
    }
    Err(SettlementError::NotificationMismatch {
        reference: purchase.external_reference.clone().unwrap_or_default(),
        detail: format!(
            "notification says user {} / {} tokens, ledger has user {} / {} tokens",
            user_id, tokens, purchase.user_id, purchase.amount
        ),
    }
    .logged())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::InMemoryDirectory;
    use crate::gateway::mock::MockPaymentGateway;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    const ALICE: UserId = UserId::new(1);
    const BOB: UserId = UserId::new(2);
    const BOBS_CHAPTER: ContentId = ContentId::new(20);
    const ALICES_CHAPTER: ContentId = ContentId::new(10);

    struct Harness {
        engine: SettlementEngine,
        gateway: Arc<MockPaymentGateway>,
        directory: Arc<InMemoryDirectory>,
        _temp: TempDir,
    }

    async fn harness() -> Harness {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.ledger_data_dir = temp.path().join("ledger");
        config.webhook.signing_secret = "whsec_test".to_string();

        let gateway = Arc::new(MockPaymentGateway::new());
        let directory = Arc::new(InMemoryDirectory::new());
        directory.publish(ALICES_CHAPTER, ALICE, "alice").await;
        directory.publish(BOBS_CHAPTER, BOB, "bob").await;

        let engine = SettlementEngine::open(config, gateway.clone(), directory.clone()).unwrap();
        Harness {
            engine,
            gateway,
            directory,
            _temp: temp,
        }
    }

    async fn fund(engine: &SettlementEngine, user: UserId, usd: Decimal) {
        let intent = engine.create_purchase_intent(user, usd).await.unwrap();
        engine
            .credit_purchase(&intent.external_reference, user, intent.tokens)
            .unwrap();
    }

    #[tokio::test]
    async fn test_purchase_intent_is_pending() {
        let h = harness().await;
        let intent = h.engine.create_purchase_intent(ALICE, dec!(5)).await.unwrap();

        assert_eq!(intent.tokens, 50);
        assert!(intent.payment_handle.contains("_secret_"));

        let request = h.gateway.intent(&intent.external_reference).await.unwrap();
        assert_eq!(request.amount_cents, 500);
        assert_eq!(request.tokens, 50);

        let rows = h.engine.list_transactions(ALICE, None, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TransactionStatus::Pending);
        assert_eq!(h.engine.get_balance(ALICE).unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_purchase_amount_validation() {
        let h = harness().await;
        for usd in [dec!(0), dec!(-1), dec!(0.05)] {
            let err = h.engine.create_purchase_intent(ALICE, usd).await.unwrap_err();
            assert!(matches!(err, SettlementError::InvalidAmount(_)), "{}", usd);
        }
        assert_eq!(h.gateway.intent_count().await, 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_persists_nothing() {
        let h = harness().await;
        h.gateway.set_failing(true);

        let err = h.engine.create_purchase_intent(ALICE, dec!(5)).await.unwrap_err();
        assert!(matches!(err, SettlementError::PaymentIntentFailed(_)));
        assert!(h.engine.list_transactions(ALICE, None, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_credit_is_idempotent() {
        let h = harness().await;
        let intent = h.engine.create_purchase_intent(ALICE, dec!(10)).await.unwrap();

        let first = h
            .engine
            .credit_purchase(&intent.external_reference, ALICE, 100)
            .unwrap();
        assert!(matches!(first, CreditOutcome::Credited(_)));

        let second = h
            .engine
            .credit_purchase(&intent.external_reference, ALICE, 100)
            .unwrap();
        assert!(matches!(second, CreditOutcome::AlreadyCompleted(_)));

        assert_eq!(h.engine.get_balance(ALICE).unwrap().balance, 100);
        assert_eq!(h.engine.metrics().duplicate_notifications.get(), 1);
        assert!(h.engine.verify_conservation(ALICE).unwrap().holds());
    }

    #[tokio::test]
    async fn test_credit_rejects_mismatch_and_unknown() {
        let h = harness().await;
        let intent = h.engine.create_purchase_intent(ALICE, dec!(10)).await.unwrap();

        let err = h
            .engine
            .credit_purchase(&intent.external_reference, BOB, 100)
            .unwrap_err();
        assert!(matches!(err, SettlementError::NotificationMismatch { .. }));

        let err = h
            .engine
            .credit_purchase(&intent.external_reference, ALICE, 1000)
            .unwrap_err();
        assert!(matches!(err, SettlementError::NotificationMismatch { .. }));

        let err = h.engine.credit_purchase("pi_unknown", ALICE, 100).unwrap_err();
        assert!(matches!(err, SettlementError::UnknownOrTerminatedTransaction(_)));

        assert_eq!(h.engine.get_balance(ALICE).unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_closed_purchase_never_credits() {
        let h = harness().await;
        let intent = h.engine.create_purchase_intent(ALICE, dec!(10)).await.unwrap();

        let closed = h
            .engine
            .close_purchase(&intent.external_reference, TransactionStatus::Failed, None)
            .unwrap();
        assert_eq!(closed.status, TransactionStatus::Failed);

        // Same close again is a no-op
        h.engine
            .close_purchase(&intent.external_reference, TransactionStatus::Failed, None)
            .unwrap();

        let err = h
            .engine
            .credit_purchase(&intent.external_reference, ALICE, 100)
            .unwrap_err();
        assert!(matches!(err, SettlementError::UnknownOrTerminatedTransaction(_)));
        assert_eq!(h.engine.get_balance(ALICE).unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_close_rejects_mismatched_metadata() {
        let h = harness().await;
        let intent = h.engine.create_purchase_intent(ALICE, dec!(10)).await.unwrap();
        let echoed = PurchaseMetadata {
            user_id: BOB,
            tokens: 100,
        };

        let err = h
            .engine
            .close_purchase(
                &intent.external_reference,
                TransactionStatus::Cancelled,
                Some(echoed),
            )
            .unwrap_err();
        assert!(matches!(err, SettlementError::NotificationMismatch { .. }));

        let purchase = h.engine.ledger().transaction(intent.transaction_id).unwrap();
        assert_eq!(purchase.status, TransactionStatus::Pending);

        let matching = PurchaseMetadata {
            user_id: ALICE,
            tokens: intent.tokens,
        };
        let closed = h
            .engine
            .close_purchase(
                &intent.external_reference,
                TransactionStatus::Cancelled,
                Some(matching),
            )
            .unwrap();
        assert_eq!(closed.status, TransactionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_tip_moves_tokens() {
        let h = harness().await;
        fund(&h.engine, ALICE, dec!(10)).await;

        let receipt = h.engine.tip(ALICE, BOBS_CHAPTER, 30).await.unwrap();
        assert_eq!(receipt.new_balance, 70);
        assert_eq!(receipt.recipient_id, BOB);
        assert_eq!(receipt.recipient_name, "bob");

        let alice = h.engine.get_balance(ALICE).unwrap();
        let bob = h.engine.get_balance(BOB).unwrap();
        assert_eq!((alice.balance, alice.total_spent), (70, 30));
        assert_eq!((bob.balance, bob.total_earned), (30, 30));

        let debit = h.engine.ledger().transaction(receipt.debit_transaction_id).unwrap();
        let credit = h.engine.ledger().transaction(receipt.credit_transaction_id).unwrap();
        assert_eq!(debit.amount, -30);
        assert_eq!(credit.amount, 30);
        assert_eq!(debit.amount + credit.amount, 0);
        assert_eq!(debit.counterparty_id, Some(BOB));
        assert_eq!(credit.counterparty_id, Some(ALICE));
        assert_eq!(credit.chapter_reference, Some(BOBS_CHAPTER));
        assert_eq!(debit.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_tip_preconditions() {
        let h = harness().await;
        fund(&h.engine, ALICE, dec!(1)).await;

        let err = h.engine.tip(ALICE, ALICES_CHAPTER, 5).await.unwrap_err();
        assert!(matches!(err, SettlementError::SelfTipNotAllowed));

        let err = h.engine.tip(ALICE, ContentId::new(99), 5).await.unwrap_err();
        assert!(matches!(err, SettlementError::TargetNotFound(99)));

        let err = h.engine.tip(ALICE, BOBS_CHAPTER, 11).await.unwrap_err();
        assert!(matches!(
            err,
            SettlementError::InsufficientBalance { required: 11, available: 10, .. }
        ));

        let err = h.engine.tip(ALICE, BOBS_CHAPTER, 0).await.unwrap_err();
        assert!(matches!(err, SettlementError::InvalidAmount(_)));

        assert_eq!(h.engine.get_balance(ALICE).unwrap().balance, 10);
        assert_eq!(h.engine.get_balance(BOB).unwrap().balance, 0);
        assert!(h.engine.list_transactions(BOB, None, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tip_to_private_content_rejected() {
        let h = harness().await;
        fund(&h.engine, ALICE, dec!(1)).await;
        h.directory
            .insert(crate::content::ContentTarget {
                content_id: ContentId::new(21),
                creator_id: Some(BOB),
                creator_name: "bob".to_string(),
                published: true,
                private: true,
            })
            .await;

        let err = h.engine.tip(ALICE, ContentId::new(21), 5).await.unwrap_err();
        assert!(matches!(err, SettlementError::TargetNotFound(21)));
    }

    #[tokio::test]
    async fn test_cashout_at_top_rate() {
        let h = harness().await;
        fund(&h.engine, ALICE, dec!(200)).await;
        h.engine.tip(ALICE, BOBS_CHAPTER, 1500).await.unwrap();
        h.directory.set_followers(BOB, 150).await;

        let receipt = h.engine.cashout(BOB, 50).await.unwrap();
        assert_eq!(receipt.rate, dec!(0.90));
        assert_eq!(receipt.payout_usd, dec!(4.5));
        assert_eq!(receipt.status, TransactionStatus::Pending);
        assert_eq!(receipt.new_balance, 1450);

        let bob = h.engine.get_balance(BOB).unwrap();
        assert_eq!(bob.total_spent, 50);
        assert!(h.engine.verify_conservation(BOB).unwrap().holds());
    }

    #[tokio::test]
    async fn test_cashout_limits() {
        let h = harness().await;
        fund(&h.engine, BOB, dec!(1)).await;

        let err = h.engine.cashout(BOB, 9).await.unwrap_err();
        assert!(matches!(
            err,
            SettlementError::BelowMinimum { minimum: 10, requested: 9 }
        ));

        let err = h.engine.cashout(BOB, 11).await.unwrap_err();
        assert!(matches!(err, SettlementError::InsufficientBalance { .. }));

        let receipt = h.engine.cashout(BOB, 10).await.unwrap();
        assert_eq!(receipt.rate, dec!(0.60));
        assert_eq!(receipt.payout_usd, dec!(0.6));
        assert_eq!(receipt.new_balance, 0);
    }

    #[tokio::test]
    async fn test_failed_cashout_is_refunded() {
        let h = harness().await;
        fund(&h.engine, BOB, dec!(5)).await;
        let receipt = h.engine.cashout(BOB, 20).await.unwrap();

        let settlement = h
            .engine
            .settle_cashout(receipt.transaction_id, PayoutOutcome::Failed)
            .unwrap();
        assert_eq!(settlement.cashout.status, TransactionStatus::Failed);
        assert_eq!(settlement.new_balance, 50);

        let refund = h
            .engine
            .ledger()
            .transaction(settlement.refund_transaction_id.unwrap())
            .unwrap();
        assert_eq!(refund.tx_type, TransactionType::Refund);
        assert_eq!(refund.amount, 20);

        let bob = h.engine.get_balance(BOB).unwrap();
        assert_eq!((bob.balance, bob.total_spent), (50, 20));
        assert!(h.engine.verify_conservation(BOB).unwrap().holds());

        let err = h
            .engine
            .settle_cashout(receipt.transaction_id, PayoutOutcome::Paid)
            .unwrap_err();
        assert!(matches!(err, SettlementError::AlreadySettled { .. }));
    }

    #[tokio::test]
    async fn test_paid_cashout_completes() {
        let h = harness().await;
        fund(&h.engine, BOB, dec!(5)).await;
        let receipt = h.engine.cashout(BOB, 20).await.unwrap();

        let settlement = h
            .engine
            .settle_cashout(receipt.transaction_id, PayoutOutcome::Paid)
            .unwrap();
        assert_eq!(settlement.cashout.status, TransactionStatus::Completed);
        assert_eq!(settlement.refund_transaction_id, None);
        assert_eq!(settlement.new_balance, 30);
        assert!(h.engine.verify_conservation(BOB).unwrap().holds());
    }

    #[tokio::test]
    async fn test_settle_rejects_non_cashout() {
        let h = harness().await;
        let intent = h.engine.create_purchase_intent(BOB, dec!(5)).await.unwrap();

        let err = h
            .engine
            .settle_cashout(intent.transaction_id, PayoutOutcome::Paid)
            .unwrap_err();
        assert!(matches!(err, SettlementError::NotCashout(_)));
    }

    #[tokio::test]
    async fn test_list_transactions_pages_newest_first() {
        let h = harness().await;
        fund(&h.engine, ALICE, dec!(10)).await;
        for _ in 0..3 {
            h.engine.tip(ALICE, BOBS_CHAPTER, 1).await.unwrap();
        }

        let all = h.engine.list_transactions(ALICE, None, 0).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[3].tx_type, TransactionType::Purchase);
        assert!(all.windows(2).all(|w| w[0].id > w[1].id));

        let page = h.engine.list_transactions(ALICE, Some(2), 1).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, all[1].id);
    }
}

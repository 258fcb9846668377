//! Invoice reconciliation
//!
//! Assembles the expected invoice for a contract and billing month from
//! tariff-resolver-priced line items plus rule-output adjustments, then
//! compares it against the received (ERP or contractor-issued) invoice.
//! Variance is always `received - expected`; the tolerance that counts as a
//! match comes from configuration, never a hardcoded constant.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::RwLock;
use tracing::info;

use crate::breach::{Disposition, RuleOutputStore};
use crate::config::EngineConfig;
use crate::context::OperationContext;
use crate::errors::{EngineError, EngineResult};
use crate::identifiers::{ComparisonId, ContractId, DefaultEventId, InvoiceId};
use crate::money::{CurrencyCode, Money};
use crate::period::BillingMonth;
use crate::resolver::{PendingReason, RateOutcome, TariffResolver};
use crate::state_machine::{DefaultEventStore, DefaultStatus};
use crate::tariff::TariffStore;

/// Metered usage for one priced line of the expected invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLine {
    /// Line description, used to pair lines during reconciliation
    pub description: String,
    /// The tariff group pricing this line
    pub tariff_group: String,
    /// Billed quantity in the tariff's unit
    pub quantity: Decimal,
}

/// One line of an invoice (expected or received)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    /// Line description
    pub description: String,
    /// Line amount (negative for credits and adjustments)
    pub amount: Decimal,
}

/// The system-computed invoice for a contract and billing month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedInvoice {
    /// The contract billed
    pub contract_id: ContractId,
    /// The billing month
    pub billing_month: BillingMonth,
    /// Billing currency
    pub currency: CurrencyCode,
    /// Priced lines plus adjustment lines
    pub lines: Vec<InvoiceLine>,
    /// Sum of line amounts
    pub total: Decimal,
    /// Default events whose consequences fed this invoice
    pub settled_defaults: Vec<DefaultEventId>,
}

/// Outcome of assembling an expected invoice
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedInvoiceOutcome {
    /// All lines priced
    Ready(ExpectedInvoice),
    /// A line's rate is blocked on missing market data
    Pending(PendingReason),
}

/// An invoice received from the counterparty or ERP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedInvoice {
    /// Invoice id
    pub id: InvoiceId,
    /// The contract billed
    pub contract_id: ContractId,
    /// The billing month
    pub billing_month: BillingMonth,
    /// Billing currency
    pub currency: CurrencyCode,
    /// Invoice lines
    pub lines: Vec<InvoiceLine>,
    /// Invoice total
    pub total: Decimal,
    /// When the invoice arrived
    pub received_at: DateTime<Utc>,
}

impl ReceivedInvoice {
    /// Create a received invoice; the total is derived from the lines
    pub fn new(
        contract_id: ContractId,
        billing_month: BillingMonth,
        currency: CurrencyCode,
        lines: Vec<InvoiceLine>,
    ) -> Self {
        let total = lines.iter().map(|l| l.amount).sum();
        Self {
            id: InvoiceId::new(),
            contract_id,
            billing_month,
            currency,
            lines,
            total,
            received_at: Utc::now(),
        }
    }
}

/// Reconciliation status of an invoice comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    /// Variance within tolerance
    Matched,
    /// Received less than expected beyond tolerance
    Underbilled,
    /// Received more than expected beyond tolerance
    Overbilled,
}

impl ReconciliationStatus {
    /// Classify a header variance against a tolerance
    pub fn classify(variance: Decimal, tolerance: Decimal) -> Self {
        if variance.abs() <= tolerance {
            ReconciliationStatus::Matched
        } else if variance > Decimal::ZERO {
            ReconciliationStatus::Overbilled
        } else {
            ReconciliationStatus::Underbilled
        }
    }
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReconciliationStatus::Matched => "matched",
            ReconciliationStatus::Underbilled => "underbilled",
            ReconciliationStatus::Overbilled => "overbilled",
        };
        write!(f, "{name}")
    }
}

/// Line-level variance in a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceComparisonLineItem {
    /// Paired line description
    pub description: String,
    /// Expected amount (zero when the line only appears on the received side)
    pub expected: Decimal,
    /// Received amount (zero when the line only appears on the expected side)
    pub received: Decimal,
    /// `received - expected`
    pub variance: Decimal,
}

/// A stored comparison of expected versus received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceComparison {
    /// Comparison id
    pub id: ComparisonId,
    /// The contract
    pub contract_id: ContractId,
    /// The billing month
    pub billing_month: BillingMonth,
    /// The received invoice compared
    pub received_invoice_id: InvoiceId,
    /// Currency both sides are denominated in
    pub currency: CurrencyCode,
    /// Expected total
    pub expected_total: Decimal,
    /// Received total
    pub received_total: Decimal,
    /// `received_total - expected_total`
    pub variance: Decimal,
    /// Classification against the configured tolerance
    pub status: ReconciliationStatus,
    /// Per-line variances
    pub line_items: Vec<InvoiceComparisonLineItem>,
    /// Amount agreed after manual negotiation, when settled
    pub final_amount: Option<Decimal>,
    /// `final_amount - received_total`, derived, never entered directly
    pub adjustment_amount: Option<Decimal>,
    /// When the comparison was computed
    pub compared_at: DateTime<Utc>,
}

/// In-memory store of invoice comparisons
#[derive(Debug, Default)]
pub struct ComparisonStore {
    comparisons: RwLock<IndexMap<ComparisonId, InvoiceComparison>>,
}

impl ComparisonStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a comparison by id
    pub fn get(&self, id: ComparisonId) -> Option<InvoiceComparison> {
        self.comparisons
            .read()
            .expect("comparison store lock poisoned")
            .get(&id)
            .cloned()
    }

    /// All comparisons for a contract, in insertion order
    pub fn for_contract(&self, contract: ContractId) -> Vec<InvoiceComparison> {
        self.comparisons
            .read()
            .expect("comparison store lock poisoned")
            .values()
            .filter(|c| c.contract_id == contract)
            .cloned()
            .collect()
    }
}

/// Assembles expected invoices and reconciles them against received ones
pub struct ReconciliationEngine<'a> {
    resolver: &'a TariffResolver<'a>,
    tariffs: &'a TariffStore,
    outputs: &'a RuleOutputStore,
    defaults: &'a DefaultEventStore,
    comparisons: &'a ComparisonStore,
    config: &'a EngineConfig,
}

impl<'a> ReconciliationEngine<'a> {
    /// Build an engine over the given stores
    pub fn new(
        resolver: &'a TariffResolver<'a>,
        tariffs: &'a TariffStore,
        outputs: &'a RuleOutputStore,
        defaults: &'a DefaultEventStore,
        comparisons: &'a ComparisonStore,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            resolver,
            tariffs,
            outputs,
            defaults,
            comparisons,
            config,
        }
    }

    /// Assemble the expected invoice for a contract and billing month
    ///
    /// Each usage line is priced via the tariff resolver; rule-output
    /// amounts for the month are appended as negative adjustment lines.
    /// Default events whose consequences land on the invoice are closed.
    /// A pending rate makes the whole invoice pending.
    pub fn assemble_expected(
        &self,
        ctx: &OperationContext,
        contract: ContractId,
        month: BillingMonth,
        usage: &[UsageLine],
    ) -> EngineResult<ExpectedInvoiceOutcome> {
        let mut currency: Option<CurrencyCode> = None;
        let mut lines = Vec::new();
        for line in usage {
            let tariff = self
                .tariffs
                .current_by_group(contract, &line.tariff_group, month)
                .ok_or_else(|| {
                    EngineError::not_found(
                        "ClauseTariff",
                        format!("group {:?} on contract {contract}", line.tariff_group),
                    )
                })?;
            let outcome = self.resolver.resolve_rate(ctx, tariff.id, month)?;
            let rate = match outcome {
                RateOutcome::Resolved(rate) => rate,
                RateOutcome::Pending(reason) => {
                    return Ok(ExpectedInvoiceOutcome::Pending(reason))
                }
            };
            match &currency {
                None => currency = Some(rate.currency.clone()),
                Some(existing) if *existing != rate.currency => {
                    return Err(EngineError::CurrencyMismatch {
                        left: existing.to_string(),
                        right: rate.currency.to_string(),
                    })
                }
                Some(_) => {}
            }
            lines.push(InvoiceLine {
                description: line.description.clone(),
                amount: Money::new(rate.rate * line.quantity, rate.currency)
                    .rounded()
                    .amount,
            });
        }
        let currency = currency.ok_or_else(|| {
            EngineError::Validation("expected invoice needs at least one usage line".to_string())
        })?;

        let mut settled_defaults = Vec::new();
        for output in self.outputs.for_contract_month(contract, month) {
            if matches!(output.disposition, Disposition::NeedsReview { .. }) {
                continue;
            }
            let mut adjustment = Decimal::ZERO;
            for amount in [&output.ld_amount, &output.invoice_adjustment]
                .into_iter()
                .flatten()
            {
                if amount.currency != currency {
                    return Err(EngineError::CurrencyMismatch {
                        left: currency.to_string(),
                        right: amount.currency.to_string(),
                    });
                }
                adjustment += amount.amount;
            }
            if adjustment.is_zero() {
                continue;
            }
            lines.push(InvoiceLine {
                description: format!("adjustment for default event {}", output.default_event_id),
                amount: -adjustment,
            });
            settled_defaults.push(output.default_event_id);
        }
        settled_defaults.dedup();
        for default_event in &settled_defaults {
            if let Some(event) = self.defaults.get(*default_event) {
                if event.status.can_transition_to(DefaultStatus::Closed) {
                    self.defaults.close(ctx, *default_event)?;
                }
            }
        }

        let total = lines.iter().map(|l| l.amount).sum();
        info!(
            contract = %contract,
            %month,
            %total,
            lines = lines.len(),
            principal = %ctx.principal.name,
            "assembled expected invoice"
        );
        Ok(ExpectedInvoiceOutcome::Ready(ExpectedInvoice {
            contract_id: contract,
            billing_month: month,
            currency,
            lines,
            total,
            settled_defaults,
        }))
    }

    /// Compare an expected invoice against the received one
    pub fn reconcile(
        &self,
        ctx: &OperationContext,
        expected: &ExpectedInvoice,
        received: &ReceivedInvoice,
    ) -> EngineResult<ComparisonId> {
        if expected.contract_id != received.contract_id {
            return Err(EngineError::ContractMismatch {
                expected: expected.contract_id.to_string(),
                actual: received.contract_id.to_string(),
            });
        }
        if expected.billing_month != received.billing_month {
            return Err(EngineError::Validation(format!(
                "billing month mismatch: expected invoice covers {}, received covers {}",
                expected.billing_month, received.billing_month
            )));
        }
        if expected.currency != received.currency {
            return Err(EngineError::CurrencyMismatch {
                left: expected.currency.to_string(),
                right: received.currency.to_string(),
            });
        }

        let line_items = pair_lines(&expected.lines, &received.lines);
        let variance = received.total - expected.total;
        let status = ReconciliationStatus::classify(variance, self.config.reconciliation_tolerance);
        let comparison = InvoiceComparison {
            id: ComparisonId::new(),
            contract_id: expected.contract_id,
            billing_month: expected.billing_month,
            received_invoice_id: received.id,
            currency: expected.currency.clone(),
            expected_total: expected.total,
            received_total: received.total,
            variance,
            status,
            line_items,
            final_amount: None,
            adjustment_amount: None,
            compared_at: ctx.requested_at,
        };
        let id = comparison.id;
        info!(
            contract = %expected.contract_id,
            month = %expected.billing_month,
            %variance,
            status = %status,
            principal = %ctx.principal.name,
            "reconciled invoice"
        );
        self.comparisons
            .comparisons
            .write()
            .expect("comparison store lock poisoned")
            .insert(id, comparison);
        Ok(id)
    }

    /// Record the negotiated final amount on a comparison
    ///
    /// The adjustment amount is derived as `final - received` here and
    /// nowhere else, so the two can never drift apart.
    pub fn record_final_amount(
        &self,
        ctx: &OperationContext,
        id: ComparisonId,
        final_amount: Decimal,
    ) -> EngineResult<InvoiceComparison> {
        let mut comparisons = self
            .comparisons
            .comparisons
            .write()
            .expect("comparison store lock poisoned");
        let comparison = comparisons
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("InvoiceComparison", id))?;
        comparison.final_amount = Some(final_amount);
        comparison.adjustment_amount = Some(final_amount - comparison.received_total);
        info!(
            comparison = %id,
            %final_amount,
            adjustment = %(final_amount - comparison.received_total),
            principal = %ctx.principal.name,
            "recorded negotiated final amount"
        );
        Ok(comparison.clone())
    }
}

/// Pair expected and received lines by description
///
/// A line present on only one side is paired against zero rather than
/// dropped, so its full amount shows up as variance.
fn pair_lines(
    expected: &[InvoiceLine],
    received: &[InvoiceLine],
) -> Vec<InvoiceComparisonLineItem> {
    let mut items: IndexMap<String, (Decimal, Decimal)> = IndexMap::new();
    for line in expected {
        items.entry(line.description.clone()).or_default().0 += line.amount;
    }
    for line in received {
        items.entry(line.description.clone()).or_default().1 += line.amount;
    }
    items
        .into_iter()
        .map(
            |(description, (expected, received))| InvoiceComparisonLineItem {
                description,
                expected,
                received,
                variance: received - expected,
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breach::{
        BreachPipeline, EvaluationOutcome, ObligationMeasurement, RuleOutputStore,
    };
    use crate::clause::{
        Clause, ClauseCategory, ComparisonOp, Confidence, EvaluationPeriod, LdTerms, MetricKind,
        NormalizedPayload, ObligationTerms, ClauseStore,
    };
    use crate::context::Principal;
    use crate::fx::ExchangeRateStore;
    use crate::graph::ObligationGraph;
    use crate::identifiers::OrgId;
    use crate::reference_price::ReferencePriceStore;
    use crate::relationship::{EdgeProvenance, RelationshipKind};
    use crate::state_machine::EventStore;
    use crate::tariff::{
        ClauseTariff, EnergySaleType, EscalationType, RateLedger, TariffStructure, TariffUnit,
    };
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use test_case::test_case;

    fn kes() -> CurrencyCode {
        CurrencyCode::new("KES").unwrap()
    }

    fn ctx() -> OperationContext {
        OperationContext::new(Principal::named("billing"), OrgId::new())
    }

    fn month() -> BillingMonth {
        BillingMonth::new(2025, 3).unwrap()
    }

    #[test_case(dec!(1000), dec!(1050), dec!(50), ReconciliationStatus::Overbilled ; "beyond tolerance overbilled")]
    #[test_case(dec!(1000), dec!(1005), dec!(5), ReconciliationStatus::Matched ; "within tolerance matched")]
    #[test_case(dec!(1000), dec!(960), dec!(-40), ReconciliationStatus::Underbilled ; "beyond tolerance underbilled")]
    #[test_case(dec!(1000), dec!(980), dec!(-20), ReconciliationStatus::Matched ; "exactly at tolerance matched")]
    fn test_classification(
        expected_total: Decimal,
        received_total: Decimal,
        want_variance: Decimal,
        want_status: ReconciliationStatus,
    ) {
        let variance = received_total - expected_total;
        assert_eq!(variance, want_variance);
        assert_eq!(ReconciliationStatus::classify(variance, dec!(20)), want_status);
    }

    struct Fixture {
        ctx: OperationContext,
        tariffs: TariffStore,
        ledger: RateLedger,
        reference_prices: ReferencePriceStore,
        fx: ExchangeRateStore,
        outputs: RuleOutputStore,
        defaults: DefaultEventStore,
        comparisons: ComparisonStore,
        config: EngineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let mut config = EngineConfig::default();
            config.reconciliation_tolerance = dec!(20);
            Self {
                ctx: ctx(),
                tariffs: TariffStore::new(),
                ledger: RateLedger::new(),
                reference_prices: ReferencePriceStore::new(),
                fx: ExchangeRateStore::new(),
                outputs: RuleOutputStore::new(),
                defaults: DefaultEventStore::new(),
                comparisons: ComparisonStore::new(),
                config,
            }
        }

        fn run<R>(&self, f: impl FnOnce(&ReconciliationEngine<'_>) -> R) -> R {
            let resolver = TariffResolver::new(
                &self.tariffs,
                &self.ledger,
                &self.reference_prices,
                &self.fx,
                &self.config,
            );
            let engine = ReconciliationEngine::new(
                &resolver,
                &self.tariffs,
                &self.outputs,
                &self.defaults,
                &self.comparisons,
                &self.config,
            );
            f(&engine)
        }

        fn insert_energy_tariff(&self, contract: ContractId) {
            let tariff = ClauseTariff::new(
                contract,
                "energy-base",
                dec!(0.10),
                TariffUnit::PerKwh,
                kes(),
                TariffStructure::Fixed,
                EnergySaleType::NetExport,
                EscalationType::None,
                NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            )
            .unwrap();
            self.tariffs.insert(&self.ctx, tariff).unwrap();
        }
    }

    fn usage() -> Vec<UsageLine> {
        vec![UsageLine {
            description: "energy delivered".to_string(),
            tariff_group: "energy-base".to_string(),
            quantity: dec!(10000),
        }]
    }

    #[test]
    fn test_expected_invoice_from_usage() {
        let fixture = Fixture::new();
        let contract = ContractId::new();
        fixture.insert_energy_tariff(contract);

        let outcome = fixture
            .run(|e| e.assemble_expected(&fixture.ctx, contract, month(), &usage()))
            .unwrap();
        let ExpectedInvoiceOutcome::Ready(invoice) = outcome else {
            panic!("expected a ready invoice");
        };
        assert_eq!(invoice.total, dec!(1000.00));
        assert_eq!(invoice.lines.len(), 1);
        assert_eq!(invoice.currency, kes());
    }

    #[test]
    fn test_rule_outputs_become_adjustment_lines_and_close_defaults() {
        let fixture = Fixture::new();
        let contract = ContractId::new();
        fixture.insert_energy_tariff(contract);

        // run a real breach through the pipeline to get a priced output
        let clauses = ClauseStore::new();
        let graph = ObligationGraph::new();
        let events = EventStore::new();
        let obligation = clauses
            .insert(
                &fixture.ctx,
                Clause::new(
                    contract,
                    ClauseCategory::Availability,
                    "4.1",
                    NormalizedPayload::Obligation(ObligationTerms {
                        metric: MetricKind::AvailabilityPct,
                        threshold: dec!(95),
                        comparison: ComparisonOp::Gte,
                        evaluation_period: EvaluationPeriod::Monthly,
                    }),
                    Confidence::certain(),
                )
                .unwrap(),
            )
            .unwrap();
        let ld = clauses
            .insert(
                &fixture.ctx,
                Clause::new(
                    contract,
                    ClauseCategory::LiquidatedDamages,
                    "9.2",
                    NormalizedPayload::LiquidatedDamages(LdTerms {
                        ld_per_point: dec!(100),
                        ld_cap_annual: None,
                        cure_period_days: 30,
                        currency: kes(),
                        priced_tariff_group: None,
                    }),
                    Confidence::certain(),
                )
                .unwrap(),
            )
            .unwrap();
        graph
            .connect(
                &fixture.ctx,
                &clauses,
                obligation,
                ld,
                RelationshipKind::Triggers,
                json!({}),
                EdgeProvenance::Explicit,
            )
            .unwrap();
        let resolver = TariffResolver::new(
            &fixture.tariffs,
            &fixture.ledger,
            &fixture.reference_prices,
            &fixture.fx,
            &fixture.config,
        );
        let pipeline = BreachPipeline::new(
            &clauses,
            &graph,
            &events,
            &fixture.defaults,
            &fixture.outputs,
            &resolver,
            &fixture.tariffs,
            &fixture.config,
        )
        .unwrap();
        let outcome = pipeline
            .evaluate(
                &fixture.ctx,
                &ObligationMeasurement {
                    clause_id: obligation,
                    billing_month: month(),
                    observed: dec!(92.5),
                    adjustment_quantity: None,
                    source_events: vec![],
                },
            )
            .unwrap();
        let EvaluationOutcome::Breached(finding) = outcome else {
            panic!("expected a breach");
        };

        let invoice_outcome = fixture
            .run(|e| e.assemble_expected(&fixture.ctx, contract, month(), &usage()))
            .unwrap();
        let ExpectedInvoiceOutcome::Ready(invoice) = invoice_outcome else {
            panic!("expected a ready invoice");
        };
        // 1000 energy minus 250 LD credit
        assert_eq!(invoice.total, dec!(750.00));
        assert_eq!(invoice.lines.len(), 2);
        assert_eq!(invoice.settled_defaults, vec![finding.default_event_id]);
        assert_eq!(
            fixture.defaults.get(finding.default_event_id).unwrap().status,
            DefaultStatus::Closed
        );
    }

    #[test]
    fn test_reconcile_pairs_lines_and_classifies() {
        let fixture = Fixture::new();
        let contract = ContractId::new();
        fixture.insert_energy_tariff(contract);
        let ExpectedInvoiceOutcome::Ready(expected) = fixture
            .run(|e| e.assemble_expected(&fixture.ctx, contract, month(), &usage()))
            .unwrap()
        else {
            panic!("expected a ready invoice");
        };

        let received = ReceivedInvoice::new(
            contract,
            month(),
            kes(),
            vec![
                InvoiceLine {
                    description: "energy delivered".to_string(),
                    amount: dec!(1030),
                },
                InvoiceLine {
                    description: "connection fee".to_string(),
                    amount: dec!(20),
                },
            ],
        );
        let id = fixture
            .run(|e| e.reconcile(&fixture.ctx, &expected, &received))
            .unwrap();
        let comparison = fixture.comparisons.get(id).unwrap();
        assert_eq!(comparison.variance, dec!(50.00));
        assert_eq!(comparison.status, ReconciliationStatus::Overbilled);
        assert_eq!(comparison.line_items.len(), 2);
        let fee = comparison
            .line_items
            .iter()
            .find(|l| l.description == "connection fee")
            .unwrap();
        assert_eq!(fee.expected, dec!(0));
        assert_eq!(fee.variance, dec!(20));
    }

    #[test]
    fn test_final_amount_derives_adjustment() {
        let fixture = Fixture::new();
        let contract = ContractId::new();
        fixture.insert_energy_tariff(contract);
        let ExpectedInvoiceOutcome::Ready(expected) = fixture
            .run(|e| e.assemble_expected(&fixture.ctx, contract, month(), &usage()))
            .unwrap()
        else {
            panic!("expected a ready invoice");
        };
        let received = ReceivedInvoice::new(
            contract,
            month(),
            kes(),
            vec![InvoiceLine {
                description: "energy delivered".to_string(),
                amount: dec!(1050),
            }],
        );
        let id = fixture
            .run(|e| e.reconcile(&fixture.ctx, &expected, &received))
            .unwrap();

        let settled = fixture
            .run(|e| e.record_final_amount(&fixture.ctx, id, dec!(1020)))
            .unwrap();
        assert_eq!(settled.final_amount, Some(dec!(1020)));
        assert_eq!(settled.adjustment_amount, Some(dec!(-30)));
    }

    #[test]
    fn test_cross_period_reconcile_rejected() {
        let fixture = Fixture::new();
        let contract = ContractId::new();
        fixture.insert_energy_tariff(contract);
        let ExpectedInvoiceOutcome::Ready(expected) = fixture
            .run(|e| e.assemble_expected(&fixture.ctx, contract, month(), &usage()))
            .unwrap()
        else {
            panic!("expected a ready invoice");
        };

        let wrong_month = ReceivedInvoice::new(
            contract,
            BillingMonth::new(2025, 4).unwrap(),
            kes(),
            vec![],
        );
        assert!(fixture
            .run(|e| e.reconcile(&fixture.ctx, &expected, &wrong_month))
            .is_err());

        let wrong_contract = ReceivedInvoice::new(ContractId::new(), month(), kes(), vec![]);
        assert!(matches!(
            fixture.run(|e| e.reconcile(&fixture.ctx, &expected, &wrong_contract)),
            Err(EngineError::ContractMismatch { .. })
        ));
    }
}

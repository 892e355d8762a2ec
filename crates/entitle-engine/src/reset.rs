//! # Quota Reset Job
//!
//! Refills `daily_remaining` to the rule's current `daily_limit` for every
//! live entitlement. Runs once a day.
//!
//! Best-effort: an orphaned entitlement (rule missing or soft-deleted) is
//! skipped and reported, a storage error on one row is logged and reported,
//! and neither stops the run.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use entitle_core::{EntitlementRule, ResetReport};

use crate::error::EngineResult;
use crate::store::EngineStore;

/// The quota reset job.
#[derive(Debug, Clone)]
pub struct QuotaResetter<S> {
    store: S,
}

impl<S: EngineStore> QuotaResetter<S> {
    pub fn new(store: S) -> Self {
        QuotaResetter { store }
    }

    /// `ResetDailyQuota()`.
    ///
    /// Only listing the entitlements can fail the whole run.
    pub async fn reset_daily_quota(&self) -> EngineResult<ResetReport> {
        let live = self.store.list_live().await?;
        info!(entitlements = live.len(), "Quota reset starting");

        let mut report = ResetReport::default();
        let mut rules: HashMap<String, Option<EntitlementRule>> = HashMap::new();

        for ent in &live {
            let rule = match rules.get(&ent.rule_id) {
                Some(cached) => cached.clone(),
                None => match self.store.rule(&ent.rule_id).await {
                    Ok(found) => {
                        rules.insert(ent.rule_id.clone(), found.clone());
                        found
                    }
                    Err(e) => {
                        error!(
                            entitlement_id = %ent.entitlement_id,
                            rule_id = %ent.rule_id,
                            error = %e,
                            "Rule lookup failed during quota reset"
                        );
                        report.failed.push(ent.entitlement_id.clone());
                        continue;
                    }
                },
            };

            let Some(rule) = rule else {
                warn!(
                    entitlement_id = %ent.entitlement_id,
                    rule_id = %ent.rule_id,
                    phone = %ent.phone,
                    "Orphaned entitlement, rule missing or deleted"
                );
                report.orphaned.push(ent.entitlement_id.clone());
                continue;
            };

            match self
                .store
                .reset_quota(&ent.entitlement_id, rule.daily_limit, Utc::now())
                .await
            {
                Ok(true) => {
                    report.updated += 1;
                    if ent.daily_remaining == rule.daily_limit {
                        report.unchanged += 1;
                    }
                }
                Ok(false) => {
                    debug!(
                        entitlement_id = %ent.entitlement_id,
                        "Entitlement revoked during reset, skipped"
                    );
                }
                Err(e) => {
                    error!(
                        entitlement_id = %ent.entitlement_id,
                        error = %e,
                        "Quota reset failed for entitlement"
                    );
                    report.failed.push(ent.entitlement_id.clone());
                }
            }
        }

        info!(
            updated = report.updated,
            unchanged = report.unchanged,
            orphaned = report.orphaned.len(),
            failed = report.failed.len(),
            "Quota reset finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use entitle_core::UserEntitlement;

    use crate::store::testing::{busy, db, rule, today, FlakyStore, Op};

    async fn grant(store: &FlakyStore, phone: &str, rule_id: &str) -> UserEntitlement {
        let r = store.db.rules().get(rule_id).await.unwrap().unwrap();
        let ent = UserEntitlement::grant(phone, &r, today());
        store.db.entitlements().create_if_absent(&ent).await.unwrap();
        ent
    }

    async fn drain(store: &FlakyStore, ent: &UserEntitlement, times: usize) {
        for _ in 0..times {
            store
                .db
                .entitlements()
                .try_decrement(&ent.entitlement_id, today())
                .await
                .unwrap();
        }
    }

    async fn remaining(store: &FlakyStore, ent: &UserEntitlement) -> i64 {
        store
            .db
            .entitlements()
            .get(&ent.entitlement_id)
            .await
            .unwrap()
            .unwrap()
            .daily_remaining
    }

    #[tokio::test]
    async fn test_reset_refills_to_limit() {
        let db = db().await;
        db.rules().insert(&rule("R1", "C1", "P1")).await.unwrap();
        let mut r2 = rule("R2", "C2", "P2");
        r2.daily_limit = 10;
        db.rules().insert(&r2).await.unwrap();
        let store = FlakyStore::new(db);

        let a = grant(&store, "13800000001", "R1").await;
        let b = grant(&store, "13800000002", "R2").await;
        let full = grant(&store, "13800000003", "R1").await;
        drain(&store, &a, 5).await;
        drain(&store, &b, 3).await;

        let report = QuotaResetter::new(store.clone())
            .reset_daily_quota()
            .await
            .unwrap();

        assert_eq!(report.updated, 3);
        assert_eq!(report.unchanged, 1);
        assert!(report.orphaned.is_empty());
        assert!(report.failed.is_empty());

        assert_eq!(remaining(&store, &a).await, 5);
        assert_eq!(remaining(&store, &b).await, 10);
        assert_eq!(remaining(&store, &full).await, 5);
    }

    #[tokio::test]
    async fn test_reset_follows_current_rule_limit() {
        let db = db().await;
        db.rules().insert(&rule("R1", "C1", "P1")).await.unwrap();
        let store = FlakyStore::new(db);
        let ent = grant(&store, "13800000001", "R1").await;

        // Limit lowered below the stored remaining count
        store
            .db
            .rules()
            .update_daily_limit("R1", 2, today() + Duration::hours(1))
            .await
            .unwrap();

        QuotaResetter::new(store.clone())
            .reset_daily_quota()
            .await
            .unwrap();
        assert_eq!(remaining(&store, &ent).await, 2);
    }

    #[tokio::test]
    async fn test_orphaned_entitlement_is_skipped() {
        let db = db().await;
        db.rules().insert(&rule("R1", "C1", "P1")).await.unwrap();
        db.rules().insert(&rule("R2", "C2", "P2")).await.unwrap();
        let store = FlakyStore::new(db);

        let orphan = grant(&store, "13800000001", "R1").await;
        let other = grant(&store, "13800000001", "R2").await;
        drain(&store, &orphan, 2).await;
        drain(&store, &other, 2).await;

        store.db.rules().soft_delete("R1", today()).await.unwrap();

        let report = QuotaResetter::new(store.clone())
            .reset_daily_quota()
            .await
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.orphaned, vec![orphan.entitlement_id.clone()]);
        assert_eq!(remaining(&store, &orphan).await, 3);
        assert_eq!(remaining(&store, &other).await, 5);
    }

    #[tokio::test]
    async fn test_storage_error_does_not_stop_run() {
        let db = db().await;
        db.rules().insert(&rule("R1", "C1", "P1")).await.unwrap();
        let store = FlakyStore::new(db);

        let broken = grant(&store, "13800000001", "R1").await;
        let fine = grant(&store, "13800000002", "R1").await;
        drain(&store, &broken, 1).await;
        drain(&store, &fine, 1).await;
        store.fail(Op::ResetQuota, Some(&broken.entitlement_id), 1, busy);

        let report = QuotaResetter::new(store.clone())
            .reset_daily_quota()
            .await
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, vec![broken.entitlement_id.clone()]);
        assert_eq!(remaining(&store, &broken).await, 4);
        assert_eq!(remaining(&store, &fine).await, 5);
    }

    #[tokio::test]
    async fn test_report_json_lists_orphans() {
        let db = db().await;
        db.rules().insert(&rule("R1", "C1", "P1")).await.unwrap();
        let store = FlakyStore::new(db);
        let orphan = grant(&store, "13800000001", "R1").await;
        store.db.rules().soft_delete("R1", today()).await.unwrap();

        let report = QuotaResetter::new(store).reset_daily_quota().await.unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["updated"], 0);
        assert_eq!(json["orphaned"][0], orphan.entitlement_id.as_str());
        assert!(json["failed"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoked_entitlements_are_not_touched() {
        let db = db().await;
        db.rules().insert(&rule("R1", "C1", "P1")).await.unwrap();
        let store = FlakyStore::new(db);

        let ent = grant(&store, "13800000001", "R1").await;
        drain(&store, &ent, 5).await;
        store
            .db
            .entitlements()
            .revoke_live("13800000001", "R1", "O9", today())
            .await
            .unwrap();

        let report = QuotaResetter::new(store.clone())
            .reset_daily_quota()
            .await
            .unwrap();

        assert_eq!(report.updated, 0);
        assert_eq!(remaining(&store, &ent).await, 0);
    }
}

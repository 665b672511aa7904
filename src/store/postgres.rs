//! PostgreSQL store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{EngagementStore, EngagementWrite, Settlement};
use crate::activation::{ActivationState, Capability};
use crate::earnings::{gate, ledger, Earning, SettlementResult, Withdrawal, WithdrawalStatus};
use crate::engagement::{
    Engagement, EngagementStatus, ListEngagementsQuery, StatusHistoryEntry, Transition,
};
use crate::error::{EngineError, EngineResult};
use crate::negotiation::{MessageBody, MessageRow, NegotiationMessage};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn insert_history(
    tx: &mut Transaction<'_, Postgres>,
    entry: &StatusHistoryEntry,
) -> EngineResult<()> {
    sqlx::query(
        r#"
        INSERT INTO engagement_status_history (
            id, engagement_id, status, stage, agreed_price, notes, actor_id, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(entry.engagement_id)
    .bind(entry.status)
    .bind(entry.stage)
    .bind(entry.agreed_price)
    .bind(&entry.notes)
    .bind(entry.actor_id)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_message(
    tx: &mut Transaction<'_, Postgres>,
    message: &NegotiationMessage,
) -> EngineResult<()> {
    let (content, amount, date, time, location) = match &message.body {
        MessageBody::Text { content } => (Some(content.clone()), None, None, None, None),
        MessageBody::PriceOffer { amount } => (None, Some(*amount), None, None, None),
        MessageBody::ScheduleProposal {
            date,
            time,
            location,
        } => (None, None, Some(*date), Some(*time), Some(location.clone())),
    };

    sqlx::query(
        r#"
        INSERT INTO negotiation_messages (
            id, engagement_id, sender_id, kind, content, amount,
            meeting_date, meeting_time, meeting_location, accepted_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(message.id)
    .bind(message.engagement_id)
    .bind(message.sender_id)
    .bind(message.body.kind())
    .bind(content)
    .bind(amount)
    .bind(date)
    .bind(time)
    .bind(location)
    .bind(message.accepted_at)
    .bind(message.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Write every mutable engagement column, conditional on `expected_version`
/// and `expected_status` when given.
async fn update_engagement(
    tx: &mut Transaction<'_, Postgres>,
    next: &Engagement,
    expected_version: Option<i64>,
    expected_status: Option<EngagementStatus>,
) -> EngineResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE engagements SET
            proposed_price = $2, agreed_price = $3, payment_status = $4,
            status = $5, stage = $6, cancellation_reason = $7, cancelled_by = $8,
            cancelled_at = $9, auto_expired = $10, meeting_date = $11,
            meeting_time = $12, meeting_location = $13, meeting_confirmed_at = $14,
            evidence_photo_ref = $15, signature_photo_ref = $16,
            meeting_verified = $17, version = $18, updated_at = $19
        WHERE id = $1
          AND ($20::BIGINT IS NULL OR version = $20)
          AND ($21::engagement_status IS NULL OR status = $21)
        "#,
    )
    .bind(next.id)
    .bind(next.proposed_price)
    .bind(next.agreed_price)
    .bind(next.payment_status)
    .bind(next.status)
    .bind(next.stage)
    .bind(&next.cancellation_reason)
    .bind(next.cancelled_by)
    .bind(next.cancelled_at)
    .bind(next.auto_expired)
    .bind(next.meeting_date)
    .bind(next.meeting_time)
    .bind(&next.meeting_location)
    .bind(next.meeting_confirmed_at)
    .bind(&next.evidence_photo_ref)
    .bind(&next.signature_photo_ref)
    .bind(next.meeting_verified)
    .bind(next.version)
    .bind(next.updated_at)
    .bind(expected_version)
    .bind(expected_status)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

/// Serialize balance-affecting writes for one provider until commit.
async fn lock_provider(tx: &mut Transaction<'_, Postgres>, provider_id: Uuid) -> EngineResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
        .bind(provider_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl EngagementStore for PgStore {
    async fn insert_engagement(
        &self,
        engagement: &Engagement,
        history: &StatusHistoryEntry,
    ) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO engagements (
                id, display_code, client_id, provider_id, profile, description,
                payment_status, status, stage, auto_expired, meeting_verified,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(engagement.id)
        .bind(&engagement.display_code)
        .bind(engagement.client_id)
        .bind(engagement.provider_id)
        .bind(engagement.profile)
        .bind(&engagement.description)
        .bind(engagement.payment_status)
        .bind(engagement.status)
        .bind(engagement.stage)
        .bind(engagement.auto_expired)
        .bind(engagement.meeting_verified)
        .bind(engagement.version)
        .bind(engagement.created_at)
        .bind(engagement.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_history(&mut tx, history).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_engagement(&self, id: Uuid) -> EngineResult<Option<Engagement>> {
        let engagement = sqlx::query_as::<_, Engagement>("SELECT * FROM engagements WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(engagement)
    }

    async fn list_engagements(&self, query: &ListEngagementsQuery) -> EngineResult<Vec<Engagement>> {
        let (limit, offset) = query.window();
        let mut builder = sqlx::QueryBuilder::new("SELECT * FROM engagements WHERE 1=1");

        if let Some(client_id) = query.client_id {
            builder.push(" AND client_id = ");
            builder.push_bind(client_id);
        }
        if let Some(provider_id) = query.provider_id {
            builder.push(" AND provider_id = ");
            builder.push_bind(provider_id);
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ");
            builder.push_bind(status);
        }

        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let items = builder
            .build_query_as::<Engagement>()
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    async fn engagement_history(&self, id: Uuid) -> EngineResult<Vec<StatusHistoryEntry>> {
        let history = sqlx::query_as::<_, StatusHistoryEntry>(
            "SELECT * FROM engagement_status_history WHERE engagement_id = $1 ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(history)
    }

    async fn commit(&self, write: &EngagementWrite) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        let transition = &write.transition;

        let updated = update_engagement(
            &mut tx,
            &transition.engagement,
            Some(transition.expected_version),
            None,
        )
        .await?;
        if updated == 0 {
            return Err(EngineError::ConcurrentModification);
        }

        insert_history(&mut tx, &transition.history).await?;

        if let Some(message) = &write.message {
            insert_message(&mut tx, message).await?;
        }

        if let Some(accepted) = &write.accepted_message {
            let result = sqlx::query(
                "UPDATE negotiation_messages SET accepted_at = $2 WHERE id = $1 AND accepted_at IS NULL",
            )
            .bind(accepted.id)
            .bind(accepted.accepted_at)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(EngineError::ConcurrentModification);
            }
        }

        if let Some(earning) = &write.earning {
            let result = sqlx::query(
                r#"
                INSERT INTO earnings (id, provider_id, engagement_id, amount, is_withdrawn, created_at)
                VALUES ($1, $2, $3, $4, FALSE, $5)
                ON CONFLICT (engagement_id) DO NOTHING
                "#,
            )
            .bind(earning.id)
            .bind(earning.provider_id)
            .bind(earning.engagement_id)
            .bind(earning.amount)
            .bind(earning.created_at)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(EngineError::ConcurrentModification);
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<Engagement>> {
        let stale = sqlx::query_as::<_, Engagement>(
            r#"
            SELECT * FROM engagements
            WHERE status = 'pending' AND created_at < $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(stale)
    }

    async fn expire_if_pending(&self, transition: &Transition) -> EngineResult<bool> {
        let mut tx = self.pool.begin().await?;
        let updated = update_engagement(
            &mut tx,
            &transition.engagement,
            Some(transition.expected_version),
            Some(EngagementStatus::Pending),
        )
        .await?;
        if updated == 0 {
            return Ok(false);
        }
        insert_history(&mut tx, &transition.history).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn completed_for_provider(&self, provider_id: Uuid) -> EngineResult<Vec<Engagement>> {
        let completed = sqlx::query_as::<_, Engagement>(
            "SELECT * FROM engagements WHERE provider_id = $1 AND status = 'completed'",
        )
        .bind(provider_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(completed)
    }

    async fn append_message(&self, message: &NegotiationMessage) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_message(&mut tx, message).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> EngineResult<Option<NegotiationMessage>> {
        let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM negotiation_messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(NegotiationMessage::try_from).transpose()
    }

    async fn list_messages(&self, engagement_id: Uuid) -> EngineResult<Vec<NegotiationMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM negotiation_messages WHERE engagement_id = $1 ORDER BY seq ASC",
        )
        .bind(engagement_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NegotiationMessage::try_from).collect()
    }

    async fn get_activation(
        &self,
        provider_id: Uuid,
        capability: Capability,
    ) -> EngineResult<Option<ActivationState>> {
        let state = sqlx::query_as::<_, ActivationState>(
            "SELECT * FROM activation_states WHERE provider_id = $1 AND capability = $2",
        )
        .bind(provider_id)
        .bind(capability)
        .fetch_optional(&self.pool)
        .await?;
        Ok(state)
    }

    async fn save_activation(&self, state: &ActivationState, expected_version: i64) -> EngineResult<()> {
        // Version 0 means no row yet: insert, and lose to any concurrent insert.
        let sql = if expected_version == 0 {
            r#"
            INSERT INTO activation_states (
                provider_id, capability, status, enabled, rejection_count,
                rejected_at, requested_at, reviewed_at, reviewed_by, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (provider_id, capability) DO NOTHING
            "#
        } else {
            r#"
            UPDATE activation_states SET
                status = $3, enabled = $4, rejection_count = $5, rejected_at = $6,
                requested_at = $7, reviewed_at = $8, reviewed_by = $9, version = $10
            WHERE provider_id = $1 AND capability = $2 AND version = $11
            "#
        };

        let mut query = sqlx::query(sql)
            .bind(state.provider_id)
            .bind(state.capability)
            .bind(state.status)
            .bind(state.enabled)
            .bind(state.rejection_count)
            .bind(state.rejected_at)
            .bind(state.requested_at)
            .bind(state.reviewed_at)
            .bind(state.reviewed_by)
            .bind(state.version);
        if expected_version != 0 {
            query = query.bind(expected_version);
        }

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::ConcurrentModification);
        }
        Ok(())
    }

    async fn list_earnings(&self, provider_id: Uuid) -> EngineResult<Vec<Earning>> {
        let earnings = sqlx::query_as::<_, Earning>(
            "SELECT * FROM earnings WHERE provider_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(provider_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(earnings)
    }

    async fn list_withdrawals(&self, provider_id: Uuid) -> EngineResult<Vec<Withdrawal>> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            "SELECT * FROM withdrawals WHERE provider_id = $1 ORDER BY created_at DESC",
        )
        .bind(provider_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(withdrawals)
    }

    async fn get_withdrawal(&self, id: Uuid) -> EngineResult<Option<Withdrawal>> {
        let withdrawal = sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(withdrawal)
    }

    async fn create_withdrawal(&self, withdrawal: &Withdrawal, minimum: i64) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        let provider_id = withdrawal.provider_id;
        lock_provider(&mut tx, provider_id).await?;

        let completed = sqlx::query_as::<_, Engagement>(
            "SELECT * FROM engagements WHERE provider_id = $1 AND status = 'completed'",
        )
        .bind(provider_id)
        .fetch_all(&mut *tx)
        .await?;
        let earnings = sqlx::query_as::<_, Earning>("SELECT * FROM earnings WHERE provider_id = $1")
            .bind(provider_id)
            .fetch_all(&mut *tx)
            .await?;
        let withdrawals =
            sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE provider_id = $1")
                .bind(provider_id)
                .fetch_all(&mut *tx)
                .await?;

        let missing = gate::missing_evidence_count(&completed);
        let balance = ledger::summarize(&earnings, &withdrawals);
        ledger::check_withdrawal(&balance, missing, withdrawal.amount, minimum)?;

        sqlx::query(
            r#"
            INSERT INTO withdrawals (id, provider_id, amount, payout_destination, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(withdrawal.id)
        .bind(withdrawal.provider_id)
        .bind(withdrawal.amount)
        .bind(&withdrawal.payout_destination)
        .bind(withdrawal.status)
        .bind(withdrawal.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn settle_withdrawal(&self, settlement: Settlement) -> EngineResult<SettlementResult> {
        let mut tx = self.pool.begin().await?;

        let current =
            sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = $1 FOR UPDATE")
                .bind(settlement.withdrawal_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| {
                    EngineError::NotFound(format!("Withdrawal {}", settlement.withdrawal_id))
                })?;
        ledger::check_settlement(current.status, settlement.status)?;

        let mut allocated_earning_ids = Vec::new();
        let mut allocated_amount = 0;
        if settlement.status == WithdrawalStatus::Completed {
            lock_provider(&mut tx, current.provider_id).await?;
            let earnings = sqlx::query_as::<_, Earning>(
                r#"
                SELECT * FROM earnings
                WHERE provider_id = $1 AND is_withdrawn = FALSE
                ORDER BY created_at ASC, id ASC
                FOR UPDATE
                "#,
            )
            .bind(current.provider_id)
            .fetch_all(&mut *tx)
            .await?;

            allocated_earning_ids = ledger::allocate_fifo(&earnings, current.amount);
            allocated_amount = earnings
                .iter()
                .filter(|e| allocated_earning_ids.contains(&e.id))
                .map(|e| e.amount)
                .sum();

            sqlx::query(
                "UPDATE earnings SET is_withdrawn = TRUE, withdrawal_id = $1 WHERE id = ANY($2)",
            )
            .bind(current.id)
            .bind(&allocated_earning_ids)
            .execute(&mut *tx)
            .await?;
        }

        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            r#"
            UPDATE withdrawals
            SET status = $2, processed_by = $3, processed_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(current.id)
        .bind(settlement.status)
        .bind(settlement.processed_by)
        .bind(settlement.at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(SettlementResult {
            withdrawal,
            allocated_earning_ids,
            allocated_amount,
        })
    }
}

//! Consistency tests for the PostgreSQL store

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, NaiveDate, NaiveTime, Utc};
    use futures_util::future::join_all;
    use sqlx::PgPool;
    use uuid::Uuid;

    use lexbridge_server::config::EngineSettings;
    use lexbridge_server::db;
    use lexbridge_server::earnings::WithdrawalStatus;
    use lexbridge_server::engagement::{
        CreateEngagementRequest, Engagement, EngagementProfile, EngagementStatus, Stage,
    };
    use lexbridge_server::store::{EngagementStore, EngagementWrite};
    use lexbridge_server::{AppState, Clock, EngineError, ManualClock, PgStore};

    /// Helper to create a migrated test database pool
    async fn setup_test_db() -> PgPool {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/lexbridge_test".to_string());

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(8)
            .connect(&database_url)
            .await
            .expect("Failed to connect to test database");
        db::run_migrations(&pool).await.expect("Failed to migrate");
        pool
    }

    struct TestApp {
        store: Arc<PgStore>,
        clock: ManualClock,
        state: AppState,
    }

    fn app(pool: &PgPool) -> TestApp {
        let store = Arc::new(PgStore::new(pool.clone()));
        let clock = ManualClock::new(Utc::now());
        let state = AppState::new(
            store.clone(),
            Arc::new(clock.clone()),
            EngineSettings::default(),
            Some(pool.clone()),
        );
        TestApp {
            store,
            clock,
            state,
        }
    }

    /// Completed engagement credited one minute after the previous one.
    async fn completed(app: &TestApp, provider_id: Uuid, price: i64) -> Engagement {
        app.clock.advance(Duration::minutes(1));
        let service = &app.state.engagement_service;
        let e = service
            .create_engagement(CreateEngagementRequest {
                client_id: Uuid::new_v4(),
                provider_id,
                profile: EngagementProfile::Simple,
                description: "Contract review".to_string(),
            })
            .await
            .expect("create");
        service.accept_price(e.id, price).await.expect("accept");
        service.mark_paid(e.id).await.expect("paid");
        service
            .advance_stage(e.id, provider_id, Stage::Completed, None)
            .await
            .expect("complete")
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_conditional_commit_rejects_stale_version() {
        let pool = setup_test_db().await;
        let TestApp { store, state, .. } = app(&pool);

        let e = state
            .engagement_service
            .create_engagement(CreateEngagementRequest {
                client_id: Uuid::new_v4(),
                provider_id: Uuid::new_v4(),
                profile: EngagementProfile::Simple,
                description: "Tenancy dispute".to_string(),
            })
            .await
            .unwrap();

        let now = e.created_at;
        let first = e.accept_offer(700, now).unwrap().unwrap();
        let second = e.cancel(e.client_id, "Withdrawn", now).unwrap();

        store.commit(&EngagementWrite::new(first)).await.unwrap();
        assert_eq!(
            store.commit(&EngagementWrite::new(second)).await.unwrap_err(),
            EngineError::ConcurrentModification
        );

        let stored = store.get_engagement(e.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EngagementStatus::Agreed);
        assert_eq!(stored.agreed_price, Some(700));
        assert_eq!(store.engagement_history(e.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_expiry_does_not_overwrite_confirmed_meeting() {
        let pool = setup_test_db().await;
        let TestApp { store, clock, state } = app(&pool);
        let service = &state.engagement_service;

        let e = service
            .create_engagement(CreateEngagementRequest {
                client_id: Uuid::new_v4(),
                provider_id: Uuid::new_v4(),
                profile: EngagementProfile::Staged,
                description: "Boundary dispute".to_string(),
            })
            .await
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let time = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let proposal = service
            .propose_schedule(e.id, e.client_id, date, time, "Registry office".to_string())
            .await
            .unwrap();
        clock.advance(Duration::minutes(90));

        let snapshot = store.get_engagement(e.id).await.unwrap().unwrap();
        service
            .accept_schedule(e.id, proposal.id, e.provider_id)
            .await
            .unwrap();

        let stale = snapshot.expire(clock.now()).unwrap();
        assert!(!store.expire_if_pending(&stale).await.unwrap());

        let stored = store.get_engagement(e.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EngagementStatus::Pending);
        assert_eq!(stored.meeting_date, Some(date));
        assert!(stored.meeting_confirmed_at.is_some());

        let fresh = stored.expire(clock.now()).unwrap();
        assert!(store.expire_if_pending(&fresh).await.unwrap());
        let expired = store.get_engagement(e.id).await.unwrap().unwrap();
        assert_eq!(expired.status, EngagementStatus::Cancelled);
        assert_eq!(expired.meeting_time, Some(time));
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_concurrent_withdrawals_cannot_overdraw() {
        let pool = setup_test_db().await;
        let app = app(&pool);
        let state = &app.state;
        let provider = Uuid::new_v4();
        completed(&app, provider, 500).await;

        let requests = (0..5).map(|_| {
            let service = state.earnings_service.clone();
            tokio::spawn(async move {
                service
                    .request_withdrawal(provider, 400, "IBAN DE00".to_string())
                    .await
            })
        });
        let results = join_all(requests).await;

        let accepted = results
            .into_iter()
            .map(|r| r.expect("task panicked"))
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(accepted, 1);

        let balance = state.earnings_service.balance(provider).await.unwrap();
        assert_eq!(balance.outstanding_withdrawals, 400);
        assert_eq!(balance.available, 100);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_settlement_consumes_oldest_earnings() {
        let pool = setup_test_db().await;
        let app = app(&pool);
        let provider = Uuid::new_v4();
        let first = completed(&app, provider, 100).await;
        let second = completed(&app, provider, 200).await;
        completed(&app, provider, 300).await;

        let earnings = &app.state.earnings_service;
        let withdrawal = earnings
            .request_withdrawal(provider, 250, "IBAN DE00".to_string())
            .await
            .unwrap();
        let result = earnings
            .settle_withdrawal(withdrawal.id, WithdrawalStatus::Completed, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(result.withdrawal.status, WithdrawalStatus::Completed);
        assert_eq!(result.allocated_amount, 300);
        assert_eq!(result.allocated_earning_ids.len(), 2);

        let marked: Vec<Uuid> = app
            .store
            .list_earnings(provider)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.is_withdrawn)
            .map(|e| e.engagement_id)
            .collect();
        assert!(marked.contains(&first.id));
        assert!(marked.contains(&second.id));

        let balance = earnings.balance(provider).await.unwrap();
        assert_eq!(balance.withdrawn_earnings, 300);
        assert_eq!(balance.available, 300);

        assert!(earnings
            .settle_withdrawal(withdrawal.id, WithdrawalStatus::Completed, Uuid::new_v4())
            .await
            .is_err());
    }
}

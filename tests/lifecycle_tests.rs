//! Engagement lifecycle tests against the in-memory store

mod common;

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, NaiveTime};
    use uuid::Uuid;

    use super::common::Harness;
    use lexbridge_server::engagement::{EngagementProfile, EngagementStatus, PaymentStatus, Stage};
    use lexbridge_server::negotiation::MessageBody;
    use lexbridge_server::store::{EngagementStore, EngagementWrite};
    use lexbridge_server::{Clock, EngineError};

    #[tokio::test]
    async fn test_end_to_end_simple_consultation() {
        let h = Harness::new();
        let service = &h.state.engagement_service;
        let e = h.create(EngagementProfile::Simple).await;
        assert_eq!(e.status, EngagementStatus::Pending);

        let e = service.propose_price(e.id, e.client_id, 500).await.unwrap();
        assert_eq!(e.status, EngagementStatus::Negotiating);
        assert_eq!(e.proposed_price, Some(500));

        let e = service.accept_price(e.id, 500).await.unwrap();
        assert_eq!(e.status, EngagementStatus::Agreed);
        assert_eq!(e.agreed_price, Some(500));

        let e = service.mark_paid(e.id).await.unwrap();
        assert_eq!(e.status, EngagementStatus::InProgress);
        assert_eq!(e.payment_status, PaymentStatus::Paid);

        let e = service
            .advance_stage(e.id, e.provider_id, Stage::Completed, None)
            .await
            .unwrap();
        assert_eq!(e.status, EngagementStatus::Completed);
        assert_eq!(e.stage, Some(Stage::Completed));
        assert_eq!(e.agreed_price, Some(500));

        let statuses: Vec<EngagementStatus> = service
            .engagement_history(e.id)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                EngagementStatus::Pending,
                EngagementStatus::Negotiating,
                EngagementStatus::Agreed,
                EngagementStatus::InProgress,
                EngagementStatus::Completed,
            ]
        );

        let messages = service.list_messages(e.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, MessageBody::PriceOffer { amount: 500 });

        let balance = h.state.earnings_service.balance(e.provider_id).await.unwrap();
        assert_eq!(balance.total_earnings, 500);
        assert_eq!(balance.available, 500);
    }

    #[tokio::test]
    async fn test_accepting_same_price_twice_writes_nothing() {
        let h = Harness::new();
        let service = &h.state.engagement_service;
        let e = h.create(EngagementProfile::Simple).await;

        let agreed = service.accept_price(e.id, 300).await.unwrap();
        let again = service.accept_price(e.id, 300).await.unwrap();
        assert_eq!(again.version, agreed.version);
        assert_eq!(service.engagement_history(e.id).await.unwrap().len(), 2);

        let err = service.accept_price(e.id, 350).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::ConflictingAgreement {
                agreed: 300,
                requested: 350
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_twice_reports_already_terminal() {
        let h = Harness::new();
        let service = &h.state.engagement_service;
        let e = h.create(EngagementProfile::Staged).await;

        let cancelled = service
            .cancel(e.id, e.client_id, "Found another provider")
            .await
            .unwrap();
        assert_eq!(cancelled.status, EngagementStatus::Cancelled);
        assert_eq!(cancelled.cancelled_by, Some(e.client_id));
        assert!(!cancelled.auto_expired);

        let err = service
            .cancel(e.id, e.client_id, "Again")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyTerminal(_)));
    }

    #[tokio::test]
    async fn test_failed_operation_leaves_no_trace() {
        let h = Harness::new();
        let service = &h.state.engagement_service;
        let e = h.create(EngagementProfile::Simple).await;

        assert!(matches!(
            service.mark_paid(e.id).await,
            Err(EngineError::InvalidTransition { .. })
        ));
        assert!(matches!(
            service.propose_price(e.id, Uuid::new_v4(), 100).await,
            Err(EngineError::Forbidden(_))
        ));

        let stored = service.get_engagement(e.id).await.unwrap();
        assert_eq!(stored, e);
        assert_eq!(service.engagement_history(e.id).await.unwrap().len(), 1);
        assert!(service.list_messages(e.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_write_is_a_concurrent_modification() {
        let h = Harness::new();
        let e = h.create(EngagementProfile::Simple).await;
        let now = h.clock.now();

        // Two writers race from the same snapshot
        let first = e.accept_offer(400, now).unwrap().unwrap();
        let second = e.cancel(e.client_id, "Changed my mind", now).unwrap();

        h.store.commit(&EngagementWrite::new(first)).await.unwrap();
        let err = h
            .store
            .commit(&EngagementWrite::new(second))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::ConcurrentModification);
        assert!(err.is_retryable());

        let stored = h.store.get_engagement(e.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EngagementStatus::Agreed);
        assert_eq!(stored.agreed_price, Some(400));
    }

    #[tokio::test]
    async fn test_agreed_price_tracks_status_through_every_step() {
        let h = Harness::new();
        let service = &h.state.engagement_service;
        let holds = |status: EngagementStatus, price: Option<i64>| {
            price.is_some() == status.holds_agreement()
        };

        let e = h.create(EngagementProfile::Staged).await;
        assert!(holds(e.status, e.agreed_price));

        let steps = [
            service.propose_price(e.id, e.provider_id, 900).await,
            service.propose_price(e.id, e.client_id, 800).await,
            service.accept_price(e.id, 850).await,
            service.mark_paid(e.id).await,
            service
                .advance_stage(e.id, e.provider_id, Stage::Filing, Some("Filed with court".to_string()))
                .await,
            service
                .advance_stage(e.id, e.client_id, Stage::DocumentCollection, None)
                .await,
            service.cancel(e.id, e.provider_id, "Client unreachable").await,
        ];
        for step in steps {
            let engagement = step.unwrap();
            assert!(
                holds(engagement.status, engagement.agreed_price),
                "invariant broken at {}",
                engagement.status
            );
        }

        let history = service.engagement_history(e.id).await.unwrap();
        let last_agreed = history.iter().rev().find_map(|h| h.agreed_price);
        assert_eq!(last_agreed, Some(850));
    }

    #[tokio::test]
    async fn test_provider_rejects_request() {
        let h = Harness::new();
        let service = &h.state.engagement_service;
        let e = h.create(EngagementProfile::Simple).await;

        assert!(matches!(
            service.reject(e.id, e.client_id, "Not my area").await,
            Err(EngineError::Forbidden(_))
        ));

        let rejected = service
            .reject(e.id, e.provider_id, "Not my area")
            .await
            .unwrap();
        assert_eq!(rejected.status, EngagementStatus::Rejected);
        assert_eq!(rejected.cancellation_reason.as_deref(), Some("Not my area"));
    }

    #[tokio::test]
    async fn test_schedule_acceptance_updates_meeting_atomically() {
        let h = Harness::new();
        let service = &h.state.engagement_service;
        let e = h.create(EngagementProfile::Staged).await;
        let date = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let time = NaiveTime::from_hms_opt(14, 30, 0).unwrap();

        let proposal = service
            .propose_schedule(e.id, e.provider_id, date, time, "Downtown office".to_string())
            .await
            .unwrap();

        assert!(matches!(
            service.accept_schedule(e.id, proposal.id, e.provider_id).await,
            Err(EngineError::Forbidden(_))
        ));

        h.clock.advance(Duration::minutes(10));
        let confirmed = service
            .accept_schedule(e.id, proposal.id, e.client_id)
            .await
            .unwrap();
        assert_eq!(confirmed.meeting_date, Some(date));
        assert_eq!(confirmed.meeting_time, Some(time));
        assert_eq!(confirmed.meeting_location.as_deref(), Some("Downtown office"));
        assert!(confirmed.meeting_confirmed_at.is_some());

        let messages = service.list_messages(e.id).await.unwrap();
        assert_eq!(messages[0].accepted_at, confirmed.meeting_confirmed_at);

        assert!(matches!(
            service.accept_schedule(e.id, proposal.id, e.client_id).await,
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_simple_engagements_cannot_schedule_meetings() {
        let h = Harness::new();
        let service = &h.state.engagement_service;
        let e = h.create(EngagementProfile::Simple).await;

        let result = service
            .propose_schedule(
                e.id,
                e.client_id,
                NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                "Office".to_string(),
            )
            .await;
        assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_messages_rejected_after_close() {
        let h = Harness::new();
        let service = &h.state.engagement_service;
        let e = h.create(EngagementProfile::Simple).await;

        service
            .post_message(e.id, e.client_id, "Hello, can you help?".to_string())
            .await
            .unwrap();
        service.cancel(e.id, e.client_id, "Resolved").await.unwrap();

        assert!(matches!(
            service
                .post_message(e.id, e.provider_id, "Sorry for the delay".to_string())
                .await,
            Err(EngineError::InvalidTransition { .. })
        ));
        assert_eq!(service.list_messages(e.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_events_published_after_commit() {
        let h = Harness::new();
        let mut events = h.state.events.subscribe();
        let e = h.create(EngagementProfile::Simple).await;

        let created = events.recv().await.unwrap();
        assert_eq!(created.entity_id, e.id);
        assert_eq!(created.state, "pending");

        h.state
            .engagement_service
            .accept_price(e.id, 200)
            .await
            .unwrap();
        let agreed = events.recv().await.unwrap();
        assert_eq!(agreed.state, "agreed");
    }
}

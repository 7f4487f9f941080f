//! Competition catalog and lifecycle.
//!
//! Competitions are created as drafts and move `draft -> live -> completed`,
//! or to `cancelled` from draft or live. Each move is a conditional update on
//! the current status, so two admins racing on the same competition cannot
//! both win.

use crate::retry::retry_read;
use moby_comps_core::environment::Clock;
use moby_comps_core::error::ReservationError;
use moby_comps_core::store::Storage;
use moby_comps_core::types::{Competition, CompetitionId, CompetitionStatus, Money, Timestamp};
use serde::Deserialize;
use std::sync::Arc;

/// Details of a competition to create.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCompetition {
    /// Display title
    pub title: String,
    /// Highest ticket number
    pub max_tickets: u32,
    /// Price of one ticket
    pub ticket_price: Money,
    /// Draw date
    pub draw_date: Timestamp,
}

/// Load a competition, retrying once on a transient store error.
pub(crate) async fn load_competition(
    store: &dyn Storage,
    id: CompetitionId,
) -> Result<Competition, ReservationError> {
    retry_read(|| store.competition(id))
        .await?
        .ok_or_else(|| ReservationError::CompetitionNotFound(id.to_string()))
}

/// Admin and catalog operations on competitions.
#[derive(Clone)]
pub struct CompetitionService {
    store: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl CompetitionService {
    /// Create the service.
    #[must_use]
    pub fn new(store: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create a draft competition.
    ///
    /// # Errors
    ///
    /// [`ReservationError::InvalidCompetition`] for a blank title or zero
    /// tickets; store errors otherwise.
    #[tracing::instrument(skip(self, details), fields(title = %details.title))]
    pub async fn create(&self, details: NewCompetition) -> Result<Competition, ReservationError> {
        let title = details.title.trim();
        if title.is_empty() {
            return Err(ReservationError::InvalidCompetition("title is required".into()));
        }
        if details.max_tickets == 0 {
            return Err(ReservationError::InvalidCompetition(
                "maxTickets must be at least 1".into(),
            ));
        }

        let competition = Competition::draft(
            title,
            details.max_tickets,
            details.ticket_price,
            details.draw_date,
            self.clock.now(),
        );
        self.store.insert_competition(competition.clone()).await?;
        tracing::info!(competition_id = %competition.id, "Competition created");
        Ok(competition)
    }

    /// Move a competition to `to`.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::CompetitionNotFound`] for an unknown id
    /// - [`ReservationError::InvalidTransition`] when the lifecycle forbids the
    ///   move, or another request moved the competition first
    #[tracing::instrument(skip(self), fields(competition_id = %id, to = %to))]
    pub async fn transition(
        &self,
        id: CompetitionId,
        to: CompetitionStatus,
    ) -> Result<Competition, ReservationError> {
        let mut competition = load_competition(self.store.as_ref(), id).await?;
        let from = competition.status;
        let invalid = || ReservationError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        };

        if !from.can_transition_to(to) {
            return Err(invalid());
        }
        if !self.store.transition_competition(id, from, to).await? {
            tracing::warn!(from = %from, "Competition changed status concurrently");
            return Err(invalid());
        }

        tracing::info!(from = %from, "Competition status changed");
        competition.status = to;
        Ok(competition)
    }

    /// Load one competition.
    ///
    /// # Errors
    ///
    /// [`ReservationError::CompetitionNotFound`] for an unknown id.
    pub async fn get(&self, id: CompetitionId) -> Result<Competition, ReservationError> {
        load_competition(self.store.as_ref(), id).await
    }

    /// List competitions, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub async fn list(
        &self,
        status: Option<CompetitionStatus>,
    ) -> Result<Vec<Competition>, ReservationError> {
        Ok(retry_read(|| self.store.list_competitions(status)).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use moby_comps_testing::{FixedClock, InMemoryStore, fixtures};

    fn service(store: &InMemoryStore) -> CompetitionService {
        CompetitionService::new(
            Arc::new(store.clone()),
            Arc::new(FixedClock::new(fixtures::t0())),
        )
    }

    fn porsche() -> NewCompetition {
        NewCompetition {
            title: "  Win a Porsche 911 ".into(),
            max_tickets: 5000,
            ticket_price: Money::from_pence(299),
            draw_date: fixtures::t0() + Duration::days(14),
        }
    }

    #[tokio::test]
    async fn create_makes_a_draft() {
        let store = InMemoryStore::new();
        let created = service(&store).create(porsche()).await.unwrap();

        assert_eq!(created.status, CompetitionStatus::Draft);
        assert_eq!(created.title, "Win a Porsche 911");
        assert_eq!(created.created_at, fixtures::t0());
        assert_eq!(service(&store).get(created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn create_rejects_zero_tickets() {
        let store = InMemoryStore::new();
        let result = service(&store)
            .create(NewCompetition {
                max_tickets: 0,
                ..porsche()
            })
            .await;
        assert!(matches!(result, Err(ReservationError::InvalidCompetition(_))));
    }

    #[tokio::test]
    async fn lifecycle_follows_allowed_transitions() {
        let store = InMemoryStore::new();
        let svc = service(&store);
        let created = svc.create(porsche()).await.unwrap();

        let live = svc.transition(created.id, CompetitionStatus::Live).await.unwrap();
        assert!(live.is_live());

        let back = svc.transition(created.id, CompetitionStatus::Draft).await;
        assert_eq!(
            back,
            Err(ReservationError::InvalidTransition {
                from: "live".into(),
                to: "draft".into()
            })
        );

        svc.transition(created.id, CompetitionStatus::Completed).await.unwrap();
        assert!(svc.transition(created.id, CompetitionStatus::Cancelled).await.is_err());
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let store = InMemoryStore::new();
        let svc = service(&store);
        fixtures::seed_live(&store, 10, 100).await;
        svc.create(porsche()).await.unwrap();

        assert_eq!(svc.list(None).await.unwrap().len(), 2);
        assert_eq!(svc.list(Some(CompetitionStatus::Live)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_competition_is_not_found() {
        let store = InMemoryStore::new();
        let result = service(&store).get(CompetitionId::new()).await;
        assert!(matches!(result, Err(ReservationError::CompetitionNotFound(_))));
    }
}

//! Apply one operation to many entities.
//!
//! A bulk run has two phases. First the matching entities are materialized
//! from a listing, bounded by [`BulkOptions::cap`]; a listing that exceeds
//! the cap is refused before anything is changed. Then the operation is
//! applied to each entity in turn. A failure is recorded against its entity
//! and the run continues; cancellation stops the run and marks every entity
//! not yet attempted as [`BulkOutcome::Cancelled`].

use std::future::Future;

use entra_admin_core::client::DirectoryClient;
use entra_admin_core::error::{DirectoryError, DirectoryResult, ErrorKind};
use entra_admin_core::models::{DirectoryObject, Progress, ProgressHook};
use entra_admin_core::pagination::EntityStream;
use futures::TryStreamExt;
use serde::Serialize;

use crate::models::{Application, Device, Group, ServicePrincipal, User};

/// Default upper bound on the entities one bulk run may touch.
pub const DEFAULT_BULK_CAP: usize = 500;

/// Something a bulk run can report on.
pub trait BulkTarget {
    fn target_id(&self) -> &str;
}

macro_rules! impl_bulk_target {
    ($($ty:ty),*) => {
        $(impl BulkTarget for $ty {
            fn target_id(&self) -> &str {
                &self.id
            }
        })*
    };
}

impl_bulk_target!(User, Group, Application, ServicePrincipal, Device, DirectoryObject);

/// Limits and callbacks for a bulk run.
#[derive(Clone)]
pub struct BulkOptions {
    cap: usize,
    progress: Option<ProgressHook>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            cap: DEFAULT_BULK_CAP,
            progress: None,
        }
    }
}

impl std::fmt::Debug for BulkOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkOptions")
            .field("cap", &self.cap)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl BulkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse runs matching more than `cap` entities.
    pub fn cap(mut self, cap: usize) -> Self {
        self.cap = cap;
        self
    }

    /// Receive [`Progress::EntityProcessed`] after each attempted entity.
    pub fn progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }
}

/// What happened to one entity.
#[derive(Debug)]
pub enum BulkOutcome {
    Succeeded,
    Failed(DirectoryError),
    /// Not attempted, or aborted in flight, because the run was cancelled.
    Cancelled,
}

impl BulkOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// The error kind of a failure.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed(err) => Some(err.kind()),
            _ => None,
        }
    }
}

impl Serialize for BulkOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("BulkOutcome", 2)?;
        match self {
            Self::Succeeded => {
                state.serialize_field("status", "succeeded")?;
                state.skip_field("error")?;
            }
            Self::Failed(err) => {
                state.serialize_field("status", "failed")?;
                state.serialize_field("error", &err.to_string())?;
            }
            Self::Cancelled => {
                state.serialize_field("status", "cancelled")?;
                state.skip_field("error")?;
            }
        }
        state.end()
    }
}

/// Outcome for one entity, in processing order.
#[derive(Debug, Serialize)]
pub struct EntityOutcome {
    pub id: String,
    #[serde(flatten)]
    pub outcome: BulkOutcome,
}

/// Per-entity results of a bulk run.
#[derive(Debug, Default, Serialize)]
pub struct BulkReport {
    pub outcomes: Vec<EntityOutcome>,
}

impl BulkReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, BulkOutcome::Failed(_)))
            .count()
    }

    pub fn cancelled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, BulkOutcome::Cancelled))
            .count()
    }

    /// Failed entities with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &DirectoryError)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            BulkOutcome::Failed(err) => Some((o.id.as_str(), err)),
            _ => None,
        })
    }
}

/// Run `operation` over every entity in `matches`.
///
/// The listing is drained completely before the first change; a listing
/// error or more than `options.cap` matches fails the whole run with no
/// changes made. After that the run never fails as a whole.
///
/// `operation` receives a clone of `client`, which carries the client's
/// cancellation token.
///
/// # Tracing
///
/// Emits a span named `entra::bulk::run`.
#[tracing::instrument(name = "entra::bulk::run", skip_all, fields(cap = options.cap))]
pub async fn run<T, F, Fut>(
    client: &DirectoryClient,
    matches: EntityStream<T>,
    options: BulkOptions,
    operation: F,
) -> DirectoryResult<BulkReport>
where
    T: BulkTarget + Send + 'static,
    F: Fn(DirectoryClient, T) -> Fut,
    Fut: Future<Output = DirectoryResult<()>>,
{
    let targets = materialize(matches, options.cap).await?;
    let total = targets.len();
    tracing::debug!(total, "bulk targets materialized");

    let mut report = BulkReport {
        outcomes: Vec::with_capacity(total),
    };
    let mut cancelled = false;

    for (index, target) in targets.into_iter().enumerate() {
        let id = target.target_id().to_string();

        if cancelled || client.is_cancelled() {
            cancelled = true;
            report.outcomes.push(EntityOutcome {
                id,
                outcome: BulkOutcome::Cancelled,
            });
            continue;
        }

        let outcome = match operation(client.clone(), target).await {
            Ok(()) => BulkOutcome::Succeeded,
            Err(err) if err.kind() == ErrorKind::Cancelled => {
                cancelled = true;
                BulkOutcome::Cancelled
            }
            Err(err) => {
                tracing::warn!(id = %id, error = %err, "bulk item failed");
                BulkOutcome::Failed(err)
            }
        };
        report.outcomes.push(EntityOutcome { id, outcome });

        if let Some(hook) = &options.progress {
            hook(Progress::EntityProcessed {
                index: index + 1,
                total,
            });
        }
    }

    tracing::debug!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        cancelled = report.cancelled(),
        "bulk run finished"
    );
    Ok(report)
}

async fn materialize<T>(mut matches: EntityStream<T>, cap: usize) -> DirectoryResult<Vec<T>> {
    let mut targets = Vec::new();
    while let Some(target) = matches.try_next().await? {
        if targets.len() == cap {
            return Err(DirectoryError::validation(format!(
                "more than {cap} entities match; narrow the filter or raise the cap"
            )));
        }
        targets.push(target);
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{odata_error, odata_page, setup_mock_client, test_user};
    use crate::users;
    use crate::ListOptions;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn objects(count: usize) -> EntityStream<DirectoryObject> {
        let items: Vec<DirectoryResult<DirectoryObject>> = (1..=count)
            .map(|i| Ok(serde_json::from_value(test_user(&format!("u-{i}"), "x")).unwrap()))
            .collect();
        futures::stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn third_conflict_does_not_abort_the_run() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        let page: Vec<_> = (1..=5).map(|i| test_user(&format!("u-{i}"), &format!("user{i}"))).collect();
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(page, None)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/users/u-\d$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_user("u-x", "x")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/users/u-3"))
            .respond_with(ResponseTemplate::new(409).set_body_json(odata_error(
                "Request_Conflict",
                "Conflicting update in progress",
            )))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path_regex(r"^/users/u-\d$"))
            .respond_with(ResponseTemplate::new(204))
            .expect(4)
            .mount(&server)
            .await;

        let report = users::disable_matching(&client, ListOptions::new(), BulkOptions::new())
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 5);
        assert_eq!(report.succeeded(), 4);
        assert_eq!(report.cancelled(), 0);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "u-3");
        assert_eq!(failures[0].1.kind(), ErrorKind::Conflict);
        let ids: Vec<_> = report.outcomes.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["u-1", "u-2", "u-3", "u-4", "u-5"]);
    }

    #[tokio::test]
    async fn cancellation_marks_remaining_entities() {
        let server = MockServer::start().await;
        let token = CancellationToken::new();
        let client = setup_mock_client(&server).await.with_cancellation(token.clone());

        let report = run(&client, objects(5), BulkOptions::new(), |_client, obj: DirectoryObject| {
            let token = token.clone();
            async move {
                if obj.id == "u-2" {
                    token.cancel();
                }
                Ok::<(), DirectoryError>(())
            }
        })
        .await
        .unwrap();

        assert_eq!(report.outcomes.len(), 5);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.cancelled(), 3);
        assert!(matches!(report.outcomes[2].outcome, BulkOutcome::Cancelled));
    }

    #[tokio::test]
    async fn in_flight_cancellation_is_reported_as_cancelled() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        let report = run(&client, objects(3), BulkOptions::new(), |_client, obj: DirectoryObject| async move {
            if obj.id == "u-1" {
                Err(DirectoryError::Cancelled)
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(report.cancelled(), 3);
        assert_eq!(report.succeeded(), 0);
    }

    #[tokio::test]
    async fn exceeding_the_cap_changes_nothing() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let err = run(&client, objects(3), BulkOptions::new().cap(2), move |_client, _obj: DirectoryObject| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), DirectoryError>(()) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn progress_reports_each_entity() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let options = BulkOptions::new().progress(Arc::new(move |p: Progress| sink.lock().unwrap().push(p)));
        run(&client, objects(2), options, |_client, _obj: DirectoryObject| async {
            Ok::<(), DirectoryError>(())
        })
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Progress::EntityProcessed { index: 1, total: 2 },
                Progress::EntityProcessed { index: 2, total: 2 },
            ]
        );
    }

    #[test]
    fn report_serializes_outcomes() {
        let report = BulkReport {
            outcomes: vec![
                EntityOutcome { id: "a".into(), outcome: BulkOutcome::Succeeded },
                EntityOutcome {
                    id: "b".into(),
                    outcome: BulkOutcome::Failed(DirectoryError::NotFound("gone".into())),
                },
            ],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcomes"][0], serde_json::json!({"id": "a", "status": "succeeded"}));
        assert_eq!(json["outcomes"][1]["status"], "failed");
        assert!(json["outcomes"][1]["error"].as_str().unwrap().contains("gone"));
    }
}

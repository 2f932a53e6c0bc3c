use flow_core::errors::DeploymentError;
use flow_core::{ServiceFilter, ServiceIdentity, ServiceState};
use uuid::Uuid;

mod common;
use common::{manager, model_version};

#[tokio::test]
async fn concurrent_deploys_of_one_identity_are_serialized() {
    let (manager, deployer) = manager();
    let identity = ServiceIdentity::new("training", "train", "model");
    let first = model_version(Uuid::new_v4());
    let second = model_version(Uuid::new_v4());

    let (a, b) = tokio::join!(manager.deploy(&first, identity.clone()), manager.deploy(&second, identity.clone()));
    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!(a.id, b.id, "both calls converge on one service record");
    assert_eq!(b.model_artifact, second.id);
    assert_eq!(b.revision, 2);
    assert_eq!(a.prediction_url(), b.prediction_url());
    assert_eq!(deployer.creates(), 1);
    assert_eq!(deployer.updates(), 1);
    assert!(!deployer.saw_overlap());
    assert_eq!(deployer.serving_artifact(&identity), Some(second.id));

    let all = manager.list(&ServiceFilter::default().include_deleted()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].state, ServiceState::Running);
}

#[tokio::test]
async fn teardown_errors_do_not_block_deletion() {
    let (manager, deployer) = manager();
    let identity = ServiceIdentity::new("training", "train", "model");
    let svc = manager.deploy(&model_version(Uuid::new_v4()), identity).await.unwrap();

    deployer.fail_deletes(true);
    let deleted = manager.delete(svc.id).await.unwrap();
    assert_eq!(deleted.state, ServiceState::Deleted);
    assert!(deleted.status_message.as_deref().unwrap_or_default().contains("teardown error"));

    assert!(matches!(manager.describe(svc.id, false).await,
                     Err(DeploymentError::ServiceNotFound(id)) if id == svc.id));
    assert_eq!(manager.describe(svc.id, true).await.unwrap().state, ServiceState::Deleted);
    assert!(matches!(manager.get_prediction_url(svc.id).await, Err(DeploymentError::ServiceNotFound(_))));
    assert!(matches!(manager.delete(svc.id).await, Err(DeploymentError::ServiceNotFound(_))));
    assert!(manager.list(&ServiceFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn redeploy_after_delete_creates_a_fresh_service() {
    let (manager, deployer) = manager();
    let identity = ServiceIdentity::new("training", "train", "model");
    let old = manager.deploy(&model_version(Uuid::new_v4()), identity.clone()).await.unwrap();
    manager.delete(old.id).await.unwrap();

    let fresh = manager.deploy(&model_version(Uuid::new_v4()), identity.clone()).await.unwrap();
    assert_ne!(fresh.id, old.id);
    assert_eq!(fresh.revision, 1);
    assert_eq!(deployer.creates(), 2);

    let history = manager.list(&ServiceFilter::default().state(ServiceState::Deleted)).await.unwrap();
    assert_eq!(history.iter().map(|s| s.id).collect::<Vec<_>>(), vec![old.id]);
}

#[tokio::test]
async fn crashed_service_is_reported_as_error_on_describe() {
    let (manager, deployer) = manager();
    let identity = ServiceIdentity::new("training", "train", "model");
    let svc = manager.deploy(&model_version(Uuid::new_v4()), identity.clone()).await.unwrap();
    deployer.crash(&identity, "out of memory");

    let seen = manager.describe(svc.id, false).await.unwrap();
    assert_eq!(seen.state, ServiceState::Error);
    let errored = manager.list(&ServiceFilter::default().state(ServiceState::Error)).await.unwrap();
    assert_eq!(errored.len(), 1);
}

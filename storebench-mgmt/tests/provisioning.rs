use reqwest::Method;
use storebench_mgmt::{
    FileShareOptions, ManagementSession, ProvisioningError, ResourceKind, ResourceLedger,
    ResourceProvisioner, TransientResource,
};
use storebench_test::server::{API_TOKEN, TestArray, TestFileShare};

async fn connect(array: &TestArray) -> ManagementSession {
    ManagementSession::connect(&array.url(), API_TOKEN)
        .await
        .unwrap()
}

#[tokio::test]
async fn file_share_lifecycle() {
    storebench_test::tracing::init();
    let array = TestArray::new().await;
    let session = connect(&array).await;
    let provisioner = ResourceProvisioner::new(&session);

    assert!(!provisioner.file_share_exists("fs1").await.unwrap());
    provisioner
        .create_file_share("fs1", &FileShareOptions::default())
        .await
        .unwrap();
    assert!(provisioner.file_share_exists("fs1").await.unwrap());
    assert_eq!(
        array.state().file_shares.get("fs1"),
        Some(&TestFileShare {
            nfs_enabled: true,
            destroyed: false,
        })
    );

    provisioner.destroy_file_share("fs1").await.unwrap();
    assert!(!provisioner.file_share_exists("fs1").await.unwrap());
    assert!(array.state().is_empty());
}

#[tokio::test]
async fn unknown_file_share_name_is_absent() {
    let array = TestArray::new().await;
    let session = connect(&array).await;

    let error = session
        .request(Method::GET, "file-systems", &[("names", "fs1")], None)
        .await
        .unwrap_err();
    assert_eq!(error.status(), Some(reqwest::StatusCode::BAD_REQUEST));
    assert!(error.is_not_found());

    let provisioner = ResourceProvisioner::new(&session);
    assert!(!provisioner.file_share_exists("fs1").await.unwrap());
    provisioner
        .create_file_share("fs1", &FileShareOptions::default())
        .await
        .unwrap();
    assert!(array.state().file_shares.contains_key("fs1"));
}

#[tokio::test]
async fn failed_lookup_still_creates_file_share() {
    let array = TestArray::new().await;
    let session = connect(&array).await;
    let provisioner = ResourceProvisioner::new(&session);
    array.state().fail(Method::GET, "file-systems");

    assert!(provisioner.file_share_exists("fs1").await.is_err());
    provisioner
        .create_file_share("fs1", &FileShareOptions::default())
        .await
        .unwrap();

    assert_eq!(
        array.state().file_shares.get("fs1"),
        Some(&TestFileShare {
            nfs_enabled: true,
            destroyed: false,
        })
    );
}

#[tokio::test]
async fn existing_file_share_is_left_alone() {
    let array = TestArray::new().await;
    array
        .state()
        .file_shares
        .insert("fs1".into(), TestFileShare::default());
    let session = connect(&array).await;

    let error = ResourceProvisioner::new(&session)
        .create_file_share("fs1", &FileShareOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        ProvisioningError::AlreadyExists {
            kind: ResourceKind::FileShare,
            ..
        }
    ));
    assert_eq!(
        array.state().file_shares.get("fs1"),
        Some(&TestFileShare::default())
    );
}

#[tokio::test]
async fn conflicting_create_is_already_exists() {
    let array = TestArray::new().await;
    let session = connect(&array).await;
    let provisioner = ResourceProvisioner::new(&session);

    provisioner.create_object_account("acct").await.unwrap();
    let error = provisioner.create_object_account("acct").await.unwrap_err();

    assert_eq!(error.to_string(), "object store account `acct` already exists");
}

#[tokio::test]
async fn destroying_a_file_share_twice_fails() {
    let array = TestArray::new().await;
    let session = connect(&array).await;
    let provisioner = ResourceProvisioner::new(&session);

    provisioner
        .create_file_share("fs1", &FileShareOptions::default())
        .await
        .unwrap();
    provisioner.destroy_file_share("fs1").await.unwrap();
    let error = provisioner.destroy_file_share("fs1").await.unwrap_err();

    assert!(matches!(
        error,
        ProvisioningError::Request {
            step: "disable the export of",
            ..
        }
    ));
}

#[tokio::test]
async fn failed_destroy_skips_eradication() {
    let array = TestArray::new().await;
    let session = connect(&array).await;
    let provisioner = ResourceProvisioner::new(&session);

    provisioner.create_object_account("acct").await.unwrap();
    provisioner.create_bucket("b1", "acct").await.unwrap();
    array.state().fail(Method::PATCH, "buckets");

    let error = provisioner.destroy_bucket("b1").await.unwrap_err();
    assert!(matches!(
        error,
        ProvisioningError::Request { step: "destroy", .. }
    ));
    assert!(array.state().buckets.contains_key("b1"));
}

#[tokio::test]
async fn object_identity_lifecycle() {
    let array = TestArray::new().await;
    let session = connect(&array).await;
    let provisioner = ResourceProvisioner::new(&session);

    provisioner.create_object_account("acct").await.unwrap();
    provisioner.create_object_user("bench", "acct").await.unwrap();
    let key = provisioner.create_credential("bench", "acct").await.unwrap();

    assert!(!key.name.is_empty());
    assert!(!key.secret_access_key.is_empty());
    assert_eq!(key.user.name, "acct/bench");
    assert!(array.state().users.contains("acct/bench"));

    // Dependents must go first.
    assert!(provisioner.destroy_object_account("acct").await.is_err());

    provisioner.destroy_credential(&key.name).await.unwrap();
    provisioner.destroy_object_user("bench", "acct").await.unwrap();
    provisioner.destroy_object_account("acct").await.unwrap();
    assert!(array.state().is_empty());
}

#[tokio::test]
async fn ledger_tears_down_in_reverse_order() {
    let array = TestArray::new().await;
    let mut session = connect(&array).await;
    let provisioner = ResourceProvisioner::new(&session);
    let mut ledger = ResourceLedger::default();

    provisioner.create_object_account("acct").await.unwrap();
    ledger.record(TransientResource::ObjectAccount("acct".into()));
    provisioner.create_object_user("bench", "acct").await.unwrap();
    ledger.record(TransientResource::ObjectUser {
        name: "bench".into(),
        account: "acct".into(),
    });
    let key = provisioner.create_credential("bench", "acct").await.unwrap();
    ledger.record(TransientResource::ObjectCredential(key.name.clone()));
    provisioner.create_bucket("b1", "acct").await.unwrap();
    ledger.record(TransientResource::Bucket("b1".into()));
    provisioner
        .create_file_share("fs1", &FileShareOptions::default())
        .await
        .unwrap();
    ledger.record(TransientResource::FileShare("fs1".into()));

    let errors = ledger.teardown(&provisioner).await;

    assert!(errors.is_empty(), "{errors:?}");
    assert!(ledger.is_empty());
    assert!(array.state().is_empty());

    session.close().await;
    assert_eq!(array.state().logouts, 1);
}

#[tokio::test]
async fn ledger_teardown_continues_after_failures() {
    let array = TestArray::new().await;
    let session = connect(&array).await;
    let provisioner = ResourceProvisioner::new(&session);
    let mut ledger = ResourceLedger::default();

    for name in ["fs1", "fs2"] {
        provisioner
            .create_file_share(name, &FileShareOptions::default())
            .await
            .unwrap();
        ledger.record(TransientResource::FileShare(name.into()));
    }
    provisioner.create_object_account("acct").await.unwrap();
    ledger.record(TransientResource::ObjectAccount("acct".into()));
    array.state().fail(Method::DELETE, "object-store-accounts");

    let errors = ledger.teardown(&provisioner).await;

    assert_eq!(errors.len(), 1);
    assert!(ledger.is_empty());
    let state = array.state();
    assert!(state.file_shares.is_empty());
    assert!(state.accounts.contains("acct"));
}

#[tokio::test]
async fn released_resources_are_not_torn_down_again() {
    let array = TestArray::new().await;
    let session = connect(&array).await;
    let provisioner = ResourceProvisioner::new(&session);
    let mut ledger = ResourceLedger::default();

    provisioner
        .create_file_share("fs1", &FileShareOptions::default())
        .await
        .unwrap();
    let share = TransientResource::FileShare("fs1".into());
    ledger.record(share.clone());

    ledger.release(&provisioner, &share).await.unwrap();
    assert!(ledger.is_empty());
    assert!(ledger.teardown(&provisioner).await.is_empty());
    assert!(array.state().is_empty());
}

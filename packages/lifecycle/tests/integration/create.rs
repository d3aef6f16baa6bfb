use common::storage::AssetStore;
use lifecycle::{
    AssetOwner, ContentKind, LifecycleError, OwnerCatalog, OwnerKindSpec, SlotSpec, Upload,
    WritePhase, WriteWarning,
};

use crate::support::{TestEnv, dimensions, jpeg, png};

mod create_owner {
    use super::*;

    #[tokio::test]
    async fn wide_image_is_downscaled_before_storing() {
        let env = TestEnv::new().await;
        let outcome = env
            .create(
                AssetOwner::new("article"),
                &[("cover", Upload::new("front.jpg", jpeg(3000, 2000)))],
            )
            .await
            .unwrap();

        assert_eq!(outcome.phase, WritePhase::Committed);
        assert!(outcome.warnings.is_empty());

        let cover = outcome.owner.asset("cover").unwrap();
        assert_eq!(cover.content_kind, ContentKind::Image);
        assert_eq!(cover.content_type.as_deref(), Some("image/jpeg"));
        assert!(cover.key.as_str().starts_with("news/covers/"));

        let stored = env.store.get(&cover.key).await.unwrap();
        assert_eq!(dimensions(&stored), (1920, 1280));
        assert_eq!(cover.size, stored.len() as u64);
    }

    #[tokio::test]
    async fn narrow_image_is_stored_byte_for_byte() {
        let env = TestEnv::new().await;
        let original = png(800, 600);
        let outcome = env
            .create(
                AssetOwner::new("slide"),
                &[("image", Upload::new("hero.png", original.clone()))],
            )
            .await
            .unwrap();

        let key = &outcome.owner.asset("image").unwrap().key;
        assert_eq!(env.store.get(key).await.unwrap(), original);
    }

    #[tokio::test]
    async fn corrupt_image_is_stored_raw_with_warning() {
        let env = TestEnv::new().await;
        let outcome = env
            .create(
                AssetOwner::new("user"),
                &[("photo", Upload::new("me.jpg", b"\xff\xd8\xff garbage".to_vec()))],
            )
            .await
            .unwrap();

        assert_eq!(outcome.warnings.len(), 1);
        assert!(matches!(&outcome.warnings[0], WriteWarning::Decode { slot, .. } if slot == "photo"));
        let key = &outcome.owner.asset("photo").unwrap().key;
        assert!(env.stored(key).await);
    }

    #[tokio::test]
    async fn owner_without_payload_commits_empty_slots() {
        let env = TestEnv::new().await;
        let outcome = env.create(AssetOwner::new("user"), &[]).await.unwrap();
        assert!(outcome.owner.slots.is_empty());
        assert!(env.row(&outcome.owner.owner_ref()).await.is_some());
    }

    #[tokio::test]
    async fn resolved_url_uses_public_prefix() {
        let env = TestEnv::new().await;
        let outcome = env
            .create(
                AssetOwner::new("media_file"),
                &[("file", Upload::new("minutes.docx", b"PK\x03\x04".to_vec()))],
            )
            .await
            .unwrap();
        let key = &outcome.owner.asset("file").unwrap().key;
        assert_eq!(env.store.resolve_url(key), format!("/media/{key}"));
    }
}

mod create_failures {
    use super::*;

    #[tokio::test]
    async fn store_failure_commits_nothing() {
        let env = TestEnv::new().await;
        let article = env.create(AssetOwner::new("article"), &[]).await.unwrap().owner;

        env.store.fail_puts_after(0);
        let err = env
            .create(
                AssetOwner::new("article_image").with_parent(article.owner_ref()),
                &[("image", Upload::new("a.png", png(10, 10)))],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Store { .. }));
        assert_eq!(env.repo.len().await, 1);
        assert!(env.store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn partial_store_failure_removes_earlier_payloads() {
        let catalog = OwnerCatalog::new([OwnerKindSpec::new("banner")
            .slot(SlotSpec::new("desktop", ContentKind::Image))
            .slot(SlotSpec::new("mobile", ContentKind::Image))])
        .unwrap();
        let env = TestEnv::with_catalog(catalog).await;

        // "desktop" is stored first and must be removed when "mobile" fails.
        env.store.fail_puts_after(1);
        let err = env
            .create(
                AssetOwner::new("banner"),
                &[
                    ("desktop", Upload::new("d.png", png(40, 20))),
                    ("mobile", Upload::new("m.png", png(20, 40))),
                ],
            )
            .await
            .unwrap_err();

        match err {
            LifecycleError::Store { key, .. } => assert_eq!(key.namespace(), "banner/mobile"),
            other => panic!("expected store error, got {other:?}"),
        }
        assert!(env.store.keys().await.is_empty());
        assert_eq!(env.repo.len().await, 0);

        env.store.heal_puts();
        let outcome = env
            .create(
                AssetOwner::new("banner"),
                &[("desktop", Upload::new("d.png", png(40, 20)))],
            )
            .await
            .unwrap();
        assert_eq!(outcome.owner.slots.len(), 1);
    }

    #[tokio::test]
    async fn commit_failure_removes_stored_payloads() {
        let env = TestEnv::new().await;
        env.repo.fail_saves(true);

        let err = env
            .create(
                AssetOwner::new("slide"),
                &[("image", Upload::new("s.png", png(20, 20)))],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Repository(_)));
        assert!(env.store.keys().await.is_empty());
        assert_eq!(env.repo.len().await, 0);
    }

    #[tokio::test]
    async fn discard_failure_leaves_orphan_for_sweeper() {
        let env = TestEnv::new().await;
        env.repo.fail_saves(true);
        env.store.fail_deletes(true);

        env.create(
            AssetOwner::new("slide"),
            &[("image", Upload::new("s.png", png(20, 20)))],
        )
        .await
        .unwrap_err();

        let leftovers = env.store.keys().await;
        assert_eq!(leftovers.len(), 1);
        assert!(env.backlog.contains(&leftovers[0]).await);

        env.store.fail_deletes(false);
        let report = env.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.backlog_purged, leftovers);
        assert!(env.store.keys().await.is_empty());
    }
}

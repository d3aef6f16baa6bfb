use std::time::Duration;

use common::storage::{AssetKey, AssetStore};
use lifecycle::{AssetOwner, ContentKind, OwnerCatalog, OwnerKindSpec, SlotSpec, Upload};

use crate::support::{TestEnv, png};

mod orphans {
    use super::*;

    #[tokio::test]
    async fn object_left_by_crashed_write_is_removed() {
        let env = TestEnv::new().await;
        // A put that completed before the process died, with no row committed.
        let key = AssetKey::parse("app/slides/0123456789abcdef0123456789abcdef.png").unwrap();
        env.store.put(&key, &png(4, 4), Some("image/png")).await.unwrap();

        let report = env.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.orphaned_keys, vec![key.clone()]);
        assert!(report.dangling_refs.is_empty());
        assert!(!env.stored(&key).await);
    }

    #[tokio::test]
    async fn kinds_missing_from_the_catalog_keep_their_objects() {
        let env = TestEnv::new().await;
        let user = env
            .create(
                AssetOwner::new("user"),
                &[("photo", Upload::new("me.png", png(8, 8)))],
            )
            .await
            .unwrap();
        let photo = user.owner.asset("photo").unwrap().key.clone();
        let stray = AssetKey::parse("app/slides/stray.png").unwrap();
        env.store.put(&stray, &png(2, 2), None).await.unwrap();

        // Configuration later narrowed to slides only.
        let narrowed = OwnerCatalog::new([OwnerKindSpec::new("slide")
            .slot(SlotSpec::new("image", ContentKind::Image).namespace("app/slides"))])
        .unwrap();
        let report = env.sweeper_for(narrowed).sweep_once().await.unwrap();

        assert_eq!(report.orphaned_keys, vec![stray]);
        assert_eq!(report.scanned_refs, 1);
        assert!(env.stored(&photo).await);
        env.assert_no_dangling_refs(&[user.owner.owner_ref()]).await;
    }

    #[tokio::test]
    async fn referenced_objects_are_untouched() {
        let env = TestEnv::new().await;
        let created = env
            .create(
                AssetOwner::new("slide"),
                &[("image", Upload::new("s.png", png(10, 10)))],
            )
            .await
            .unwrap();

        let report = env.sweeper.sweep_once().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.scanned_refs, 1);
        let key = &created.owner.asset("image").unwrap().key;
        assert!(env.stored(key).await);
    }

    #[tokio::test]
    async fn grace_period_protects_fresh_uploads() {
        let env = TestEnv::with_grace_period(Duration::from_secs(600)).await;
        let key = AssetKey::parse("mediafiles/in-flight.bin").unwrap();
        env.store.put(&key, b"uploading", None).await.unwrap();

        let report = env.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.retained_recent, vec![key.clone()]);
        assert!(report.orphaned_keys.is_empty());
        assert!(env.stored(&key).await);
    }

    #[tokio::test]
    async fn failed_orphan_delete_enters_backlog_until_exhausted() {
        let env = TestEnv::new().await;
        let key = AssetKey::parse("news/images/stale.png").unwrap();
        env.store.put(&key, b"x", None).await.unwrap();
        env.store.fail_deletes(true);

        let first = env.sweeper.sweep_once().await.unwrap();
        assert_eq!(first.failed_purges, vec![key.clone()]);
        assert_eq!(env.backlog.attempts(&key).await, 1);

        // Backlog allows three retries after the first failure.
        for _ in 0..3 {
            let report = env.sweeper.sweep_once().await.unwrap();
            assert!(report.backlog_exhausted.is_empty());
            // Backlogged keys are not attempted a second time by the orphan scan.
            assert!(report.failed_purges.is_empty());
        }
        let report = env.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.backlog_exhausted, vec![key.clone()]);
        assert!(!env.backlog.contains(&key).await);

        // Dropped from the backlog, it is still an orphan to the next scan.
        env.store.fail_deletes(false);
        let report = env.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.orphaned_keys, vec![key]);
    }
}

mod integrity {
    use super::*;

    #[tokio::test]
    async fn missing_object_is_reported_never_repaired() {
        let env = TestEnv::new().await;
        let created = env
            .create(
                AssetOwner::new("media_file"),
                &[("file", Upload::new("a.pdf", b"%PDF".to_vec()))],
            )
            .await
            .unwrap();
        let owner = created.owner.owner_ref();
        let key = created.owner.asset("file").unwrap().key.clone();
        env.store.delete(&key).await.unwrap();

        for _ in 0..2 {
            let report = env.sweeper.sweep_once().await.unwrap();
            assert_eq!(report.dangling_refs.len(), 1);
            assert_eq!(report.dangling_refs[0].owner, owner);
            assert_eq!(report.dangling_refs[0].asset.key, key);
        }
        assert_eq!(env.row(&owner).await.unwrap(), created.owner);
        assert!(!env.stored(&key).await);
    }
}

use lifecycle::{AssetOwner, LifecycleError, OwnerRef, Upload};

use crate::support::{TestEnv, png};

/// A page with two image children and one file child.
async fn page_with_children(env: &TestEnv) -> (OwnerRef, Vec<OwnerRef>) {
    let page = env.create(AssetOwner::new("page"), &[]).await.unwrap().owner;
    let page_ref = page.owner_ref();

    let mut children = Vec::new();
    for (kind, slot, upload) in [
        ("page_image", "image", Upload::new("one.png", png(10, 10))),
        ("page_image", "image", Upload::new("two.gif", b"GIF89a".to_vec())),
        ("page_file", "file", Upload::new("guide.pdf", b"%PDF-1.4".to_vec())),
    ] {
        let child = env
            .create(
                AssetOwner::new(kind).with_parent(page_ref.clone()),
                &[(slot, upload)],
            )
            .await
            .unwrap();
        children.push(child.owner.owner_ref());
    }
    (page_ref, children)
}

mod cascade {
    use super::*;

    #[tokio::test]
    async fn deleting_parent_purges_every_child_key() {
        let env = TestEnv::new().await;
        let (page, children) = page_with_children(&env).await;
        let keys = env.store.keys().await;
        assert_eq!(keys.len(), 3);

        let outcome = env.manager.on_delete(&page).await.unwrap();

        assert_eq!(outcome.removed_owners.len(), 4);
        assert_eq!(outcome.removed_owners.last(), Some(&page));
        assert_eq!(outcome.purged_keys.len(), 3);
        assert!(outcome.deferred_purges.is_empty());

        for key in &keys {
            assert!(!env.stored(key).await, "{key} survived");
        }
        assert!(env.row(&page).await.is_none());
        for child in &children {
            assert!(env.row(child).await.is_none());
        }
        assert_eq!(env.repo.len().await, 0);
    }

    #[tokio::test]
    async fn parent_slot_and_child_slots_are_both_purged() {
        let env = TestEnv::new().await;
        let article = env
            .create(
                AssetOwner::new("article"),
                &[("cover", Upload::new("cover.png", png(10, 10)))],
            )
            .await
            .unwrap()
            .owner;
        env.create(
            AssetOwner::new("article_image").with_parent(article.owner_ref()),
            &[("image", Upload::new("inline.png", png(8, 8)))],
        )
        .await
        .unwrap();
        env.create(
            AssetOwner::new("article_attachment").with_parent(article.owner_ref()),
            &[("file", Upload::new("press.docx", b"PK".to_vec()))],
        )
        .await
        .unwrap();

        let outcome = env.manager.on_delete(&article.owner_ref()).await.unwrap();
        assert_eq!(outcome.purged_keys.len(), 3);
        assert!(env.store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn deleting_child_leaves_parent_and_siblings() {
        let env = TestEnv::new().await;
        let (page, children) = page_with_children(&env).await;

        let outcome = env.manager.on_delete(&children[0]).await.unwrap();
        assert_eq!(outcome.removed_owners, vec![children[0].clone()]);
        assert_eq!(outcome.purged_keys.len(), 1);

        assert!(env.row(&page).await.is_some());
        assert!(env.row(&children[1]).await.is_some());
        assert_eq!(env.store.keys().await.len(), 2);
        env.assert_no_dangling_refs(&children).await;
    }

    #[tokio::test]
    async fn second_delete_is_not_found() {
        let env = TestEnv::new().await;
        let slide = env
            .create(
                AssetOwner::new("slide"),
                &[("image", Upload::new("s.png", png(10, 10)))],
            )
            .await
            .unwrap()
            .owner
            .owner_ref();

        env.manager.on_delete(&slide).await.unwrap();
        assert!(matches!(
            env.manager.on_delete(&slide).await,
            Err(LifecycleError::NotFound(_))
        ));
    }
}

mod deferred {
    use super::*;

    #[tokio::test]
    async fn unreachable_store_defers_purge_but_rows_are_gone() {
        let env = TestEnv::new().await;
        let (page, _children) = page_with_children(&env).await;
        let keys = env.store.keys().await;

        env.store.fail_deletes(true);
        let outcome = env.manager.on_delete(&page).await.unwrap();

        assert!(outcome.purged_keys.is_empty());
        assert_eq!(outcome.deferred_purges.len(), 3);
        assert_eq!(env.repo.len().await, 0);
        assert_eq!(env.backlog.len().await, 3);

        env.store.fail_deletes(false);
        let report = env.sweeper.sweep_once().await.unwrap();
        assert_eq!(report.backlog_purged.len(), 3);
        for key in &keys {
            assert!(!env.stored(key).await);
        }
    }
}

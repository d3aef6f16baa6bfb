use futures::TryStreamExt;
use lifecycle::{AssetOwner, RecordRepository, RepositoryError, SlotRef};
use sea_orm::{EntityTrait, SqlErr};
use server::entity::asset_owner;
use server::repository::SeaOrmRepository;

use crate::support::{memory_db, owner_with_ref};

mod save_and_load {
    use super::*;

    #[tokio::test]
    async fn owner_round_trips_with_refs() {
        let repo = SeaOrmRepository::new(memory_db().await);
        let owner = owner_with_ref("slide", "image", "app/slides/a.png", None);

        repo.save(&owner).await.unwrap();
        let loaded = repo
            .get_previous_version(&owner.owner_ref())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.id, owner.id);
        assert_eq!(loaded.kind, "slide");
        assert_eq!(loaded.slots, owner.slots);
        assert!(loaded.parent.is_none());
    }

    #[tokio::test]
    async fn resave_replaces_refs_and_keeps_created_at() {
        let repo = SeaOrmRepository::new(memory_db().await);
        let mut owner = owner_with_ref("article", "cover", "news/covers/1.jpg", None);
        repo.save(&owner).await.unwrap();

        let first = owner.clone();
        owner.slots = owner_with_ref("article", "cover", "news/covers/2.jpg", None).slots;
        owner.updated_at = chrono::Utc::now();
        repo.save(&owner).await.unwrap();

        let loaded = repo
            .get_previous_version(&owner.owner_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.asset("cover").unwrap().key.as_str(), "news/covers/2.jpg");
        assert_eq!(
            loaded.created_at.timestamp_millis(),
            first.created_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn wrong_kind_is_not_found() {
        let repo = SeaOrmRepository::new(memory_db().await);
        let owner = AssetOwner::new("user");
        repo.save(&owner).await.unwrap();

        let mut other = owner.owner_ref();
        other.kind = "slide".into();
        assert!(repo.get_previous_version(&other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn id_of_another_kind_is_a_conflict() {
        let repo = SeaOrmRepository::new(memory_db().await);
        let user = owner_with_ref("user", "photo", "photos/users/me.png", None);
        repo.save(&user).await.unwrap();

        let mut slide = owner_with_ref("slide", "image", "app/slides/s.png", None);
        slide.id = user.id;
        assert!(matches!(
            repo.save(&slide).await,
            Err(RepositoryError::Conflict(r)) if r == slide.owner_ref()
        ));

        let kept = repo
            .get_previous_version(&user.owner_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.slots, user.slots);
        assert!(
            repo.get_previous_version(&slide.owner_ref())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn missing_parent_is_rejected() {
        let repo = SeaOrmRepository::new(memory_db().await);
        let ghost = AssetOwner::new("page").owner_ref();
        let child = owner_with_ref("page_file", "file", "pages/files/x.pdf", Some(ghost));

        assert!(matches!(
            repo.save(&child).await,
            Err(RepositoryError::NotFound(_))
        ));
        assert!(
            repo.get_previous_version(&child.owner_ref())
                .await
                .unwrap()
                .is_none()
        );
    }
}

mod tree {
    use super::*;

    #[tokio::test]
    async fn children_and_delete_tree() {
        let repo = SeaOrmRepository::new(memory_db().await);
        let page = AssetOwner::new("page");
        repo.save(&page).await.unwrap();

        let a = owner_with_ref("page_image", "image", "pages/images/a.png", Some(page.owner_ref()));
        let b = owner_with_ref("page_file", "file", "pages/files/b.pdf", Some(page.owner_ref()));
        repo.save(&a).await.unwrap();
        repo.save(&b).await.unwrap();

        let children = repo.children(&page.owner_ref()).await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.parent == Some(page.owner_ref())));
        assert!(children.iter().all(|c| c.slots.len() == 1));

        let removed = repo
            .delete_tree(&[a.owner_ref(), b.owner_ref(), page.owner_ref()])
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert!(repo.children(&page.owner_ref()).await.unwrap().is_empty());
        assert!(
            repo.get_previous_version(&page.owner_ref())
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(repo.delete_tree(&[page.owner_ref()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_tree_refuses_to_strand_a_child() {
        let repo = SeaOrmRepository::new(memory_db().await);
        let page = AssetOwner::new("page");
        repo.save(&page).await.unwrap();
        // Created after the caller collected the subtree.
        let late = owner_with_ref("page_file", "file", "pages/files/late.pdf", Some(page.owner_ref()));
        repo.save(&late).await.unwrap();

        assert!(matches!(
            repo.delete_tree(&[page.owner_ref()]).await,
            Err(RepositoryError::WouldOrphan(r)) if r == late.owner_ref()
        ));
        assert!(
            repo.get_previous_version(&page.owner_ref())
                .await
                .unwrap()
                .is_some()
        );
        let children = repo.children(&page.owner_ref()).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, late.id);
    }

    #[tokio::test]
    async fn foreign_key_blocks_deleting_a_parent_directly() {
        let repo = SeaOrmRepository::new(memory_db().await);
        let page = AssetOwner::new("page");
        repo.save(&page).await.unwrap();
        let child = AssetOwner::new("page_image").with_parent(page.owner_ref());
        repo.save(&child).await.unwrap();

        let result = asset_owner::Entity::delete_by_id(page.id.0)
            .exec(repo.connection())
            .await;
        assert!(matches!(
            result.map_err(|e| e.sql_err()),
            Err(Some(SqlErr::ForeignKeyConstraintViolation(_)))
        ));
    }
}

mod enumerate {
    use super::*;

    #[tokio::test]
    async fn streams_every_row_across_pages() {
        let repo = SeaOrmRepository::new(memory_db().await).with_page_size(2);
        let mut ids = Vec::new();
        for i in 0..5 {
            let owner = owner_with_ref("slide", "image", &format!("app/slides/{i}.png"), None);
            repo.save(&owner).await.unwrap();
            ids.push(owner.id);
        }
        repo.save(&AssetOwner::new("user")).await.unwrap();

        let slides: Vec<AssetOwner> = repo.enumerate_all("slide").try_collect().await.unwrap();
        let mut seen: Vec<_> = slides.iter().map(|s| s.id).collect();
        seen.sort();
        ids.sort();
        assert_eq!(seen, ids);
        assert!(slides.iter().all(|s| s.slots.len() == 1));

        let none: Vec<AssetOwner> = repo.enumerate_all("media_file").try_collect().await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn refs_stream_across_kinds_and_pages() {
        let repo = SeaOrmRepository::new(memory_db().await).with_page_size(2);
        let mut expected = Vec::new();
        for (kind, slot, key) in [
            ("slide", "image", "app/slides/1.png"),
            ("slide", "image", "app/slides/2.png"),
            ("user", "photo", "photos/users/3.png"),
            ("retired_kind", "scan", "retired/4.tif"),
            ("media_file", "file", "mediafiles/5.pdf"),
        ] {
            let owner = owner_with_ref(kind, slot, key, None);
            repo.save(&owner).await.unwrap();
            expected.push((owner.owner_ref(), slot.to_string(), key.to_string()));
        }
        repo.save(&AssetOwner::new("page")).await.unwrap();

        let refs: Vec<SlotRef> = repo.enumerate_refs().try_collect().await.unwrap();
        let mut seen: Vec<_> = refs
            .into_iter()
            .map(|r| (r.owner, r.slot, r.asset.key.as_str().to_string()))
            .collect();
        seen.sort();
        expected.sort();
        assert_eq!(seen, expected);
    }
}

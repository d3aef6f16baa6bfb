use std::sync::Arc;

use lifecycle::{AssetOwner, Upload};

use crate::support::{TestEnv, png};

mod same_owner {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_replacements_leave_one_winner() {
        let env = TestEnv::new().await;
        let created = env
            .create(
                AssetOwner::new("slide"),
                &[("image", Upload::new("k0.png", png(16, 16)))],
            )
            .await
            .unwrap();
        let owner = created.owner.owner_ref();
        let k0 = created.owner.asset("image").unwrap().key.clone();

        let (a, b) = tokio::join!(
            env.replace(&owner, "image", Upload::new("k1.png", png(20, 20))),
            env.replace(&owner, "image", Upload::new("k2.png", png(24, 24))),
        );
        let k1 = a.unwrap().owner.asset("image").unwrap().key.clone();
        let k2 = b.unwrap().owner.asset("image").unwrap().key.clone();
        assert_ne!(k1, k2);

        let winner = env.row(&owner).await.unwrap().asset("image").unwrap().key.clone();
        assert!(winner == k1 || winner == k2);
        assert!(!env.stored(&k0).await);
        env.assert_no_dangling_refs(std::slice::from_ref(&owner)).await;

        // Whatever the interleaving, the sweep leaves exactly the winner.
        env.sweeper.sweep_once().await.unwrap();
        assert_eq!(env.store.keys().await, vec![winner]);
    }
}

mod different_owners {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_creates_are_all_consistent() {
        let env = TestEnv::new().await;

        let mut handles = Vec::new();
        for i in 0..16u32 {
            let manager = Arc::clone(&env.manager);
            handles.push(tokio::spawn(async move {
                let uploads = [(
                    "image".to_string(),
                    Upload::new(format!("slide-{i}.png"), png(10 + i, 10)),
                )]
                .into_iter()
                .collect();
                manager
                    .on_create(AssetOwner::new("slide"), uploads)
                    .await
                    .map(|o| o.owner.owner_ref())
            }));
        }

        let mut owners = Vec::new();
        for handle in handles {
            owners.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(env.repo.len().await, 16);
        assert_eq!(env.store.keys().await.len(), 16);
        env.assert_no_dangling_refs(&owners).await;

        let report = env.sweeper.sweep_once().await.unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn interleaved_updates_and_deletes_never_dangle() {
        let env = TestEnv::new().await;
        let mut owners = Vec::new();
        for i in 0..8u32 {
            let created = env
                .create(
                    AssetOwner::new("user"),
                    &[("photo", Upload::new("p.png", png(8 + i, 8)))],
                )
                .await
                .unwrap();
            owners.push(created.owner.owner_ref());
        }

        let mut handles = Vec::new();
        for (i, owner) in owners.iter().cloned().enumerate() {
            let manager = Arc::clone(&env.manager);
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    manager.on_delete(&owner).await.map(|_| ())
                } else {
                    let changes = [(
                        "photo".to_string(),
                        lifecycle::SlotChange::Replace(Upload::new("q.png", png(40, 8 + i as u32))),
                    )]
                    .into_iter()
                    .collect();
                    manager.on_update(&owner, changes).await.map(|_| ())
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        env.assert_no_dangling_refs(&owners).await;
        assert_eq!(env.repo.len().await, 4);
        assert_eq!(env.store.keys().await.len(), 4);
        assert!(env.sweeper.sweep_once().await.unwrap().is_clean());
    }
}

//! Property tests for the post service over cached and uncached storage.

use std::sync::Arc;

use crudstore_service::{ErrorCode, PostService};
use crudstore_test_utils::fixtures;
use crudstore_test_utils::generators::{arb_data, arb_user_id};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Whatever is created reads back unchanged.
    #[test]
    fn prop_round_trip(user in arb_user_id(), data in arb_data(), cached in any::<bool>()) {
        let read = runtime().block_on(async {
            let service = if cached {
                PostService::new(Arc::new(fixtures::cached_memory_storage(8)))
            } else {
                PostService::new(Arc::new(fixtures::uncached_memory_storage()))
            };
            let created = service.create(&user, &data).await.unwrap();
            service.read(&user, &created.post_id).await.unwrap()
        });

        prop_assert_eq!(&read.data, &data);
        prop_assert_eq!(&read.user_id, &user);
        prop_assert!(read.created_at <= read.updated_at);
    }

    /// Reads never see data older than the last successful update.
    #[test]
    fn prop_update_visibility(
        user in arb_user_id(),
        versions in prop::collection::vec(arb_data(), 1..6),
    ) {
        let (latest, updates) = runtime().block_on(async {
            let service = PostService::new(Arc::new(fixtures::cached_memory_storage(8)));
            let created = service.create(&user, "initial").await.unwrap();
            // Prime the cache before the first update.
            service.read(&user, &created.post_id).await.unwrap();

            let mut updates = Vec::new();
            for data in &versions {
                updates.push(service.update(&user, &created.post_id, data).await.unwrap());
                let read = service.read(&user, &created.post_id).await.unwrap();
                assert_eq!(&read.data, data);
            }
            (service.read(&user, &created.post_id).await.unwrap(), updates)
        });

        prop_assert_eq!(Some(&latest.data), versions.last());
        for pair in updates.windows(2) {
            prop_assert!(pair[1].updated_at > pair[0].updated_at);
        }
    }

    /// Missing posts are reported as invalid arguments, never internal errors.
    #[test]
    fn prop_missing_post_is_invalid_argument(user in arb_user_id(), post in "[a-z0-9]{1,32}") {
        let (read, update, delete) = runtime().block_on(async {
            let service = PostService::new(Arc::new(fixtures::cached_memory_storage(8)));
            (
                service.read(&user, &post).await,
                service.update(&user, &post, "x").await,
                service.delete(&user, &post).await,
            )
        });

        prop_assert_eq!(read.unwrap_err().code, ErrorCode::InvalidArgument);
        prop_assert_eq!(update.unwrap_err().code, ErrorCode::InvalidArgument);
        prop_assert!(delete.is_ok());
    }
}

use std::sync::Arc;

use raw_focus::services::group_service::GroupService;
use raw_focus::services::user_service::UserService;
use raw_focus::store::{paths, DocumentStore};
use raw_focus::utils::connection_quality::ConnectionQualityMonitor;

async fn setup(count: usize) -> (Arc<DocumentStore>, UserService, GroupService) {
    let store = Arc::new(DocumentStore::in_memory().await.unwrap());
    let quality = ConnectionQualityMonitor::new();
    let users = UserService::new(store.clone(), quality.clone());
    for i in 0..count {
        let uid = format!("u{}", i);
        users.create_user(&uid, &format!("{}@example.com", uid), &uid, &uid).await.unwrap();
    }
    let groups = GroupService::new(store.clone(), users.clone(), quality);
    (store, users, groups)
}

async fn assert_counter_matches(store: &DocumentStore, groups: &GroupService, group_id: &str) {
    let group = groups.get_group(group_id).await.unwrap();
    let members = store.list(&paths::members(group_id)).await.unwrap();
    assert_eq!(group.member_count as usize, members.len());
    assert_eq!(group.member_ids.len(), members.len());
}

#[tokio::test]
async fn member_count_tracks_the_member_collection() {
    let (store, _, groups) = setup(12).await;
    let group = groups.create_group("u0", "Library", Some("quiet floor")).await.unwrap();

    for i in 1..12 {
        assert!(groups.join_group(&format!("u{}", i), &group.invite_code).await.is_some());
        assert_counter_matches(&store, &groups, &group.group_id).await;
    }
    assert!(groups.join_group("u3", &group.invite_code).await.is_none());
    assert_counter_matches(&store, &groups, &group.group_id).await;

    for i in [4, 7, 11] {
        assert!(groups.leave_group(&format!("u{}", i), &group.group_id).await);
        assert_counter_matches(&store, &groups, &group.group_id).await;
    }

    assert_eq!(groups.get_group_members(&group.group_id).await.len(), 9);
}

#[tokio::test]
async fn creator_leaving_a_shared_group_keeps_it() {
    let (store, users, groups) = setup(2).await;
    let group = groups.create_group("u0", "Pair", None).await.unwrap();
    groups.join_group("u1", &group.invite_code).await.unwrap();

    assert!(groups.leave_group("u0", &group.group_id).await);
    let remaining = groups.get_group(&group.group_id).await.unwrap();
    assert_eq!(remaining.member_ids, vec!["u1".to_string()]);
    assert_counter_matches(&store, &groups, &group.group_id).await;
    assert!(users.get_user_data("u0").await.unwrap().group_ids.is_empty());
}

#[tokio::test]
async fn sole_creator_leaving_deletes_everything() {
    let (store, users, groups) = setup(1).await;
    let group = groups.create_group("u0", "Solo", None).await.unwrap();
    assert!(groups.leave_group("u0", &group.group_id).await);
    assert!(groups.get_group(&group.group_id).await.is_none());
    assert!(store.list(&paths::members(&group.group_id)).await.unwrap().is_empty());
    assert!(users.get_user_data("u0").await.unwrap().group_ids.is_empty());
    assert!(groups.get_user_groups("u0").await.is_empty());
}

#[tokio::test]
async fn last_member_leaving_deletes_the_group_even_if_not_creator() {
    let (store, users, groups) = setup(2).await;
    let group = groups.create_group("u0", "Handover", None).await.unwrap();
    groups.join_group("u1", &group.invite_code).await.unwrap();

    assert!(groups.leave_group("u0", &group.group_id).await);
    assert!(groups.leave_group("u1", &group.group_id).await);

    assert!(groups.get_group(&group.group_id).await.is_none());
    assert!(store.list(&paths::members(&group.group_id)).await.unwrap().is_empty());
    assert!(users.get_user_data("u1").await.unwrap().group_ids.is_empty());
    assert!(groups.join_group("u0", &group.invite_code).await.is_none());
}

// Collection and document paths used by the services.

pub const USERS: &str = "users";
pub const GROUPS: &str = "groups";

pub fn user(uid: &str) -> String {
    format!("{}/{}", USERS, uid)
}

pub fn friends(uid: &str) -> String {
    format!("{}/{}/friends", USERS, uid)
}

pub fn friend(uid: &str, peer_id: &str) -> String {
    format!("{}/{}", friends(uid), peer_id)
}

pub fn projects(uid: &str) -> String {
    format!("{}/{}/projects", USERS, uid)
}

pub fn project(uid: &str, project_id: &str) -> String {
    format!("{}/{}", projects(uid), project_id)
}

pub fn achievements(uid: &str) -> String {
    format!("{}/{}/achievements", USERS, uid)
}

pub fn achievement(uid: &str, achievement_id: &str) -> String {
    format!("{}/{}", achievements(uid), achievement_id)
}

pub fn notifications(uid: &str) -> String {
    format!("{}/{}/notifications", USERS, uid)
}

pub fn notification(uid: &str, notification_id: &str) -> String {
    format!("{}/{}", notifications(uid), notification_id)
}

pub fn group(group_id: &str) -> String {
    format!("{}/{}", GROUPS, group_id)
}

pub fn members(group_id: &str) -> String {
    format!("{}/{}/members", GROUPS, group_id)
}

pub fn member(group_id: &str, uid: &str) -> String {
    format!("{}/{}", members(group_id), uid)
}
